// SPDX-License-Identifier: GPL-3.0-only

//! Scripted fakes for the injected OS services, shared by the unit suites.

use crate::audio::backend::{
    AudioBackend, DeviceDescriptor, InputStream, SampleType, StreamSpec,
};
use crate::error::CoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// What a scripted stream does once its samples run out.
#[derive(Debug, Clone)]
pub enum AfterScript {
    /// Keep returning empty (invalid) blocks; consumers skip them.
    Eof,
    /// Keep returning silent blocks of the requested size.
    Silence,
    /// Fail the next read.
    Error(String),
}

/// Behavior of one `(device, sample type, rate)` combination.
#[derive(Debug, Clone)]
pub enum Behavior {
    OpenFail(String),
    /// Streams blocks whose peak exceeds the garbage ceiling.
    Garbage,
    Valid {
        samples: Vec<f32>,
        after: AfterScript,
    },
}

pub struct ScriptedBackend {
    devices: Vec<DeviceDescriptor>,
    behaviors: Mutex<HashMap<(usize, SampleType, u32), Behavior>>,
    pub opens: Mutex<Vec<StreamSpec>>,
}

impl ScriptedBackend {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            behaviors: Mutex::new(HashMap::new()),
            opens: Mutex::new(Vec::new()),
        }
    }

    pub fn device(index: usize, name: &str, host_api: &str, channels: u16, rate: u32) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            name: name.to_string(),
            host_api: host_api.to_string(),
            channels,
            default_sample_rate: rate,
        }
    }

    pub fn script(&self, index: usize, sample_type: SampleType, rate: u32, behavior: Behavior) {
        self.behaviors
            .lock()
            .insert((index, sample_type, rate), behavior);
    }

    /// Script the same behavior for every probed rate of a device.
    pub fn script_all_rates(&self, index: usize, sample_type: SampleType, behavior: &Behavior) {
        for rate in [16_000, 44_100, 48_000] {
            self.script(index, sample_type, rate, behavior.clone());
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }
}

impl AudioBackend for ScriptedBackend {
    fn input_devices(&self) -> Result<Vec<DeviceDescriptor>, CoreError> {
        Ok(self.devices.clone())
    }

    fn open_input(&self, spec: StreamSpec) -> Result<Box<dyn InputStream>, CoreError> {
        self.opens.lock().push(spec);
        let behavior = self
            .behaviors
            .lock()
            .get(&(spec.device_index, spec.sample_type, spec.sample_rate))
            .cloned()
            .unwrap_or_else(|| Behavior::OpenFail("unscripted combination".to_string()));

        match behavior {
            Behavior::OpenFail(reason) => Err(CoreError::DeviceOpenFailed {
                index: spec.device_index,
                reason,
            }),
            Behavior::Garbage => Ok(Box::new(ScriptedStream {
                remaining: Vec::new(),
                after: AfterScript::Silence,
                garbage: true,
            })),
            Behavior::Valid { samples, after } => Ok(Box::new(ScriptedStream {
                remaining: samples,
                after,
                garbage: false,
            })),
        }
    }
}

struct ScriptedStream {
    remaining: Vec<f32>,
    after: AfterScript,
    garbage: bool,
}

impl InputStream for ScriptedStream {
    fn read(&mut self, frames: usize) -> Result<Vec<f32>, CoreError> {
        // Pace reads so capture loops do not spin.
        std::thread::sleep(Duration::from_millis(1));

        if self.garbage {
            return Ok(vec![3.0; frames]);
        }
        if !self.remaining.is_empty() {
            let take = frames.min(self.remaining.len());
            return Ok(self.remaining.drain(..take).collect());
        }
        match &self.after {
            AfterScript::Eof => Ok(Vec::new()),
            AfterScript::Silence => Ok(vec![0.0; frames]),
            AfterScript::Error(message) => Err(CoreError::StreamFailed(message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted speech engine
// ---------------------------------------------------------------------------

use crate::models::{ComputeKind, DeviceKind, WhisperModelId};
use crate::transcribe::engine::{
    DecodeInfo, DecodeOptions, EngineError, EngineSegment, ModelEngine, SegmentFlow, SpeechModel,
};
use std::collections::VecDeque;
use std::sync::Arc;

pub fn seg(text: &str, start_s: f32, end_s: f32) -> EngineSegment {
    EngineSegment {
        text: text.to_string(),
        start_s,
        end_s,
        avg_log_prob: -0.2,
    }
}

/// Per-model decode script, selected by the pass's VAD flag.
#[derive(Clone, Default)]
pub struct FakeModelScript {
    pub vad_on_segments: Vec<EngineSegment>,
    pub vad_off_segments: Vec<EngineSegment>,
    pub delay_per_segment: Duration,
    pub fail_decode: Option<String>,
    pub deadline_exceeded: bool,
}

struct FakeModel {
    script: FakeModelScript,
}

impl SpeechModel for FakeModel {
    fn transcribe(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
        opts: &DecodeOptions,
        sink: &mut dyn FnMut(EngineSegment) -> SegmentFlow,
    ) -> Result<DecodeInfo, EngineError> {
        if self.script.deadline_exceeded {
            return Err(EngineError::DeadlineExceeded);
        }
        if let Some(message) = &self.script.fail_decode {
            return Err(EngineError::Decode(message.clone()));
        }

        let segments = if opts.vad_filter {
            &self.script.vad_on_segments
        } else {
            &self.script.vad_off_segments
        };
        for segment in segments {
            if !self.script.delay_per_segment.is_zero() {
                std::thread::sleep(self.script.delay_per_segment);
            }
            if sink(segment.clone()) == SegmentFlow::Stop {
                break;
            }
        }

        Ok(DecodeInfo {
            language: "en".to_string(),
            language_probability: 0.99,
            duration_s: audio.len() as f32 / sample_rate as f32,
        })
    }
}

/// Scripted `ModelEngine`: records load calls and pops scripted load
/// failures before handing out `FakeModel`s.
pub struct FakeEngine {
    pub gpu: bool,
    pub script: FakeModelScript,
    pub load_errors: Mutex<VecDeque<String>>,
    pub loads: Arc<Mutex<Vec<(WhisperModelId, DeviceKind, ComputeKind)>>>,
}

impl FakeEngine {
    pub fn new(gpu: bool, script: FakeModelScript) -> Self {
        Self {
            gpu,
            script,
            load_errors: Mutex::new(VecDeque::new()),
            loads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_next_load(&self, message: &str) {
        self.load_errors.lock().push_back(message.to_string());
    }
}

impl ModelEngine for FakeEngine {
    fn gpu_available(&self) -> bool {
        self.gpu
    }

    fn load(
        &self,
        model: WhisperModelId,
        device: DeviceKind,
        compute: ComputeKind,
    ) -> Result<Box<dyn SpeechModel>, EngineError> {
        self.loads.lock().push((model, device, compute));
        if let Some(message) = self.load_errors.lock().pop_front() {
            return Err(EngineError::Load(message));
        }
        Ok(Box::new(FakeModel {
            script: self.script.clone(),
        }))
    }
}

/// A constant-amplitude tone stand-in for speech.
pub fn speech_samples(duration_s: f32, rate: u32) -> Vec<f32> {
    let count = (duration_s * rate as f32) as usize;
    (0..count)
        .map(|i| (i as f32 * 0.3).sin() * 0.2)
        .collect()
}

pub fn silence_samples(duration_s: f32, rate: u32) -> Vec<f32> {
    vec![0.0; (duration_s * rate as f32) as usize]
}
