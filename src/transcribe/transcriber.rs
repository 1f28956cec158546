// SPDX-License-Identifier: GPL-3.0-only

//! Whisper transcription orchestration: lazy model load with CUDA fallback,
//! two decode passes with per-pass deadlines inside a per-clip budget, and
//! cooperative cancellation.

use crate::error::CoreError;
use crate::models::{
    AudioClip, AudioStats, ComputeKind, DebugInfo, DeviceKind, PassDebug, StopReason,
    TranscriptionResult, TranscriptionSegment, WhisperModelId,
};
use crate::transcribe::engine::{
    DecodeOptions, EngineError, ModelEngine, SegmentFlow, SpeechModel, VadParams,
};
use crate::transcribe::whisper::CandleWhisperEngine;
use crate::transcribe::CancelSignal;
use log::{info, warn};
use serde_json::json;
use std::time::{Duration, Instant};

pub const MAX_SEGMENTS: usize = 50;
// Very lenient; stricter values make the engine over-reject short clips.
pub const NO_SPEECH_THRESHOLD: f32 = 0.95;
pub const TRANSCRIBE_TIMEOUT_S: f32 = 180.0;
/// Minimum input RMS for the no-VAD retry pass. Tunable; do not change
/// without A/B data.
pub const PASS_B_MIN_RMS: f32 = 0.003;
const MIN_RETRY_BUDGET_S: f32 = 5.0;

const CUDA_ERROR_KEYWORDS: [&str; 5] = ["cublas", "cuda", "cudnn", "cusparse", "nvcuda"];

/// Wall-clock budget for all passes on one clip.
#[must_use]
pub fn total_budget_s(audio_duration_s: f32) -> f32 {
    // Slow CPUs can take well over real time for the first segment decode.
    (audio_duration_s * 8.0 + 25.0).clamp(60.0, 240.0)
}

#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub model: WhisperModelId,
    pub language: String,
    pub device: DeviceKind,
    pub compute: ComputeKind,
    pub beam_size: usize,
    pub vad_filter: bool,
    pub word_timestamps: bool,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model: WhisperModelId::default(),
            language: "en".to_string(),
            device: DeviceKind::Auto,
            compute: ComputeKind::Auto,
            beam_size: 1,
            vad_filter: true,
            word_timestamps: false,
        }
    }
}

/// Optional progress observers. Both fire from the transcription worker
/// thread.
#[derive(Default)]
pub struct Observers<'a> {
    pub on_status: Option<&'a (dyn Fn(&str) + Send + Sync)>,
    pub on_debug: Option<&'a (dyn Fn(serde_json::Value) + Send + Sync)>,
}

impl Observers<'_> {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    fn status(&self, message: &str) {
        if let Some(f) = self.on_status {
            f(message);
        }
    }

    fn debug(&self, event: serde_json::Value) {
        if let Some(f) = self.on_debug {
            f(event);
        }
    }
}

struct PassOutcome {
    name: &'static str,
    text: String,
    segments: Vec<TranscriptionSegment>,
    language: String,
    confidence: f32,
    duration_s: f32,
    debug: PassDebug,
}

/// Owns the speech model lifecycle and runs decode passes over clips.
pub struct Transcriber {
    config: TranscriberConfig,
    engine: Box<dyn ModelEngine>,
    model: Option<Box<dyn SpeechModel>>,
    resolved: Option<(DeviceKind, ComputeKind)>,
}

impl Transcriber {
    #[must_use]
    pub fn new(config: TranscriberConfig) -> Self {
        Self::with_engine(config, Box::new(CandleWhisperEngine::new()))
    }

    #[must_use]
    pub fn with_engine(config: TranscriberConfig, engine: Box<dyn ModelEngine>) -> Self {
        Self {
            config,
            engine,
            model: None,
            resolved: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TranscriberConfig {
        &self.config
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// The `(device, compute)` pair the loaded model runs on.
    #[must_use]
    pub fn resolved_device(&self) -> Option<(DeviceKind, ComputeKind)> {
        self.resolved
    }

    /// Release the model from memory.
    pub fn unload(&mut self) {
        self.model = None;
        self.resolved = None;
        info!("Model unloaded");
    }

    fn resolve_device(&self) -> (DeviceKind, ComputeKind) {
        if self.config.device != DeviceKind::Auto && self.config.compute != ComputeKind::Auto {
            return (self.config.device, self.config.compute);
        }
        if self.engine.gpu_available() {
            info!("CUDA available, using float16");
            (DeviceKind::Cuda, ComputeKind::Float16)
        } else {
            info!("CUDA not available, using CPU int8");
            (DeviceKind::Cpu, ComputeKind::Int8)
        }
    }

    /// Load the model if not yet loaded. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ModelLoadFailed` for anything the one-shot CUDA fallback
    /// does not absorb.
    pub fn load_model(&mut self) -> Result<(), CoreError> {
        if self.model.is_some() {
            return Ok(());
        }

        let (device, compute) = self.resolve_device();
        info!(
            "Loading model {} on {device} ({compute})…",
            self.config.model
        );
        let t0 = Instant::now();

        match self.engine.load(self.config.model, device, compute) {
            Ok(model) => {
                self.model = Some(model);
                self.resolved = Some((device, compute));
            }
            Err(e) => {
                let message = e.to_string();
                let lowered = message.to_lowercase();
                let cuda_related = CUDA_ERROR_KEYWORDS.iter().any(|kw| lowered.contains(kw));
                if device == DeviceKind::Cuda && cuda_related {
                    warn!("CUDA load failed ({message}), falling back to CPU int8");
                    let model = self
                        .engine
                        .load(self.config.model, DeviceKind::Cpu, ComputeKind::Int8)
                        .map_err(|e2| CoreError::ModelLoadFailed(e2.to_string()))?;
                    self.model = Some(model);
                    self.resolved = Some((DeviceKind::Cpu, ComputeKind::Int8));
                } else {
                    return Err(CoreError::ModelLoadFailed(message));
                }
            }
        }

        info!("Model loaded in {:.1}s", t0.elapsed().as_secs_f32());
        Ok(())
    }

    /// Transcribe one clip.
    ///
    /// # Errors
    ///
    /// Returns `ModelLoadFailed` when lazy loading fails and `Decode` when
    /// the engine fails outside the deadline paths. Cancellation and
    /// timeouts are never errors; they yield empty results.
    #[allow(clippy::cast_possible_truncation)]
    pub fn transcribe(
        &mut self,
        clip: &AudioClip,
        cancel: &CancelSignal,
        observers: &Observers<'_>,
    ) -> Result<TranscriptionResult, CoreError> {
        if cancel.is_set() {
            return Ok(self.empty_result());
        }

        observers.status("Loading model…");
        self.load_model()?;

        if cancel.is_set() {
            return Ok(self.empty_result());
        }

        let stats = AudioStats {
            duration_s: clip.duration_s(),
            rms: clip.rms(),
            peak: clip.peak(),
            samples: clip.samples.len(),
        };
        info!(
            "Audio stats: {:.2}s, rms={:.5}, peak={:.4}, samples={}",
            stats.duration_s, stats.rms, stats.peak, stats.samples
        );
        if stats.peak < 1e-6 {
            warn!("Audio appears to be silent (peak={:.6})", stats.peak);
        }
        observers.debug(json!({
            "event": "audio",
            "duration_s": stats.duration_s,
            "rms": stats.rms,
            "peak": stats.peak,
        }));

        observers.status("Transcribing…");
        let t0 = Instant::now();
        let budget_s = total_budget_s(stats.duration_s);
        observers.debug(json!({
            "event": "timeout_budget",
            "audio_duration_s": stats.duration_s,
            "total_budget_s": budget_s,
        }));

        // First pass: VAD enabled, fast and usually correct.
        let use_vad_first = self.config.vad_filter;
        let mut selected = self.run_pass(clip, use_vad_first, cancel, observers, budget_s, &stats)?;
        let mut passes = vec![selected.debug.clone()];

        // Retry once without VAD when it dropped everything but the audio
        // clearly carries energy.
        if use_vad_first && selected.text.is_empty() && stats.rms >= PASS_B_MIN_RMS && !cancel.is_set() {
            let remaining_s = budget_s - t0.elapsed().as_secs_f32();
            if remaining_s >= MIN_RETRY_BUDGET_S {
                warn!("No text with VAD enabled; retrying without VAD");
                let retry = self.run_pass(clip, false, cancel, observers, remaining_s, &stats)?;
                passes.push(retry.debug.clone());
                if !retry.text.is_empty() {
                    selected = retry;
                }
            }
        }

        let processing_ms = t0.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Transcribed {} segments in {:.0}ms ({:.1}s audio)",
            selected.segments.len(),
            processing_ms,
            selected.duration_s
        );

        Ok(TranscriptionResult {
            text: selected.text,
            language: selected.language,
            language_confidence: selected.confidence,
            audio_duration_s: selected.duration_s,
            processing_time_ms: processing_ms,
            segments: selected.segments,
            model_name: self.config.model.to_string(),
            debug_info: DebugInfo {
                audio: stats,
                passes,
                selected_pass: selected.name.to_string(),
                processing_time_ms: processing_ms,
            },
        })
    }

    #[allow(clippy::too_many_lines)]
    fn run_pass(
        &mut self,
        clip: &AudioClip,
        use_vad: bool,
        cancel: &CancelSignal,
        observers: &Observers<'_>,
        budget_s: f32,
        stats: &AudioStats,
    ) -> Result<PassOutcome, CoreError> {
        let pass_name = if use_vad { "vad_on" } else { "vad_off" };
        observers.debug(json!({
            "event": "pass_start",
            "pass_name": pass_name,
            "use_vad": use_vad,
        }));

        let pass_timeout_s = TRANSCRIBE_TIMEOUT_S.min(budget_s).max(0.0);
        observers.debug(json!({
            "event": "engine_call_start",
            "pass_name": pass_name,
            "timeout_s": pass_timeout_s,
        }));

        let t0 = Instant::now();
        let opts = DecodeOptions {
            language: self.config.language.clone(),
            beam_size: self.config.beam_size,
            vad_filter: use_vad,
            vad: VadParams::default(),
            condition_on_previous_text: false,
            temperature: 0.0,
            no_speech_threshold: NO_SPEECH_THRESHOLD,
            compression_ratio_threshold: 2.4,
            log_prob_threshold: -1.0,
            word_timestamps: self.config.word_timestamps,
            deadline: t0 + Duration::from_secs_f32(pass_timeout_s),
            cancel: cancel.clone(),
        };

        let Some(model) = self.model.as_mut() else {
            return Err(CoreError::ModelLoadFailed("model not loaded".to_string()));
        };

        let mut segments: Vec<TranscriptionSegment> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        let mut stop_reason = StopReason::Eof;

        let result = model.transcribe(&clip.samples, clip.sample_rate, &opts, &mut |segment| {
            if cancel.is_set() {
                stop_reason = StopReason::Cancelled;
                return SegmentFlow::Stop;
            }
            if segments.len() >= MAX_SEGMENTS {
                stop_reason = StopReason::SegmentCap;
                return SegmentFlow::Stop;
            }
            if t0.elapsed().as_secs_f32() > pass_timeout_s {
                stop_reason = StopReason::HardTimeout;
                return SegmentFlow::Stop;
            }
            let text = segment.text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
                segments.push(TranscriptionSegment {
                    text: text.to_string(),
                    start_s: segment.start_s,
                    end_s: segment.end_s,
                    avg_log_prob: segment.avg_log_prob,
                });
            }
            SegmentFlow::Continue
        });

        let info = match result {
            Ok(info) => {
                observers.debug(json!({
                    "event": "engine_call_end",
                    "pass_name": pass_name,
                }));
                Some(info)
            }
            Err(EngineError::DeadlineExceeded) => {
                warn!("Engine call timed out after {pass_timeout_s:.1}s");
                stop_reason = if segments.is_empty() {
                    StopReason::PassTimeout
                } else {
                    StopReason::HardTimeout
                };
                None
            }
            Err(e) => return Err(CoreError::Decode(e.to_string())),
        };

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
        let debug = PassDebug {
            name: pass_name.to_string(),
            use_vad,
            segment_count: segments.len(),
            stop_reason,
            elapsed_ms,
        };
        observers.debug(json!({
            "event": "pass_end",
            "name": pass_name,
            "use_vad": use_vad,
            "segment_count": debug.segment_count,
            "stop_reason": stop_reason.to_string(),
            "elapsed_ms": elapsed_ms,
        }));

        let (language, confidence, duration_s) = match info {
            Some(info) => (info.language, info.language_probability, info.duration_s),
            None => (self.config.language.clone(), 0.0, stats.duration_s),
        };

        Ok(PassOutcome {
            name: pass_name,
            text: texts.join(" "),
            segments,
            language,
            confidence,
            duration_s,
            debug,
        })
    }

    fn empty_result(&self) -> TranscriptionResult {
        TranscriptionResult {
            language: self.config.language.clone(),
            model_name: self.config.model.to_string(),
            ..TranscriptionResult::default()
        }
    }
}
