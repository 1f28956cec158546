// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine: manual (push-to-talk / toggle) and energy-gated auto
//! modes. One capture thread per session; clips always come out as mono f32
//! within the duration bounds.

use crate::audio::backend::{AudioBackend, InputStream, StreamSpec, SampleType};
use crate::audio::processing::is_valid_audio;
use crate::audio::state::{
    AUTO_BLOCK_MS, AutoEvent, AutoVadMachine, MANUAL_BLOCK_MS, MAX_DURATION_S, MIN_DURATION_S,
    RecorderPhase,
};
use crate::error::CoreError;
use crate::models::AudioClip;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub device_index: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_type: SampleType,
    pub energy_threshold: f32,
    pub silence_ms: u32,
}

/// Callbacks fired from the capture thread during auto mode.
pub struct AutoCallbacks {
    pub on_speech_start: Box<dyn Fn() + Send + Sync>,
    pub on_speech_end: Box<dyn Fn() + Send + Sync>,
    pub on_clip_ready: Box<dyn Fn(AudioClip) + Send + Sync>,
}

struct RecorderInner {
    phase: RecorderPhase,
    blocks: Vec<Vec<f32>>,
    session_error: Option<String>,
}

pub struct Recorder {
    backend: Arc<dyn AudioBackend>,
    config: RecorderConfig,
    inner: Arc<Mutex<RecorderInner>>,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>, config: RecorderConfig) -> Self {
        Self {
            backend,
            config,
            inner: Arc::new(Mutex::new(RecorderInner {
                phase: RecorderPhase::Idle,
                blocks: Vec::new(),
                session_error: None,
            })),
            stop: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn phase(&self) -> RecorderPhase {
        self.inner.lock().phase
    }

    #[must_use]
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    fn open_stream(&self) -> Result<Box<dyn InputStream>, CoreError> {
        self.backend.open_input(StreamSpec {
            device_index: self.config.device_index,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            sample_type: self.config.sample_type,
        })
    }

    /// Begin capturing for a manual session.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpenFailed` when the stream cannot be opened; the
    /// recorder stays `Idle`.
    pub fn start_manual(&self) -> Result<(), CoreError> {
        {
            let inner = self.inner.lock();
            if inner.phase != RecorderPhase::Idle {
                warn!("start_manual ignored: recorder is {:?}", inner.phase);
                return Ok(());
            }
        }

        let mut stream = self.open_stream()?;

        {
            let mut inner = self.inner.lock();
            inner.phase = RecorderPhase::ManualRecording;
            inner.blocks.clear();
            inner.session_error = None;
        }
        self.stop.store(false, Ordering::Relaxed);

        #[allow(clippy::cast_possible_truncation)]
        let frames = (self.config.sample_rate as u64 * MANUAL_BLOCK_MS / 1000) as usize;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_samples = (MAX_DURATION_S * self.config.sample_rate as f32) as usize;

        let inner = Arc::clone(&self.inner);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::Builder::new()
            .name("voxkey-capture".to_string())
            .spawn(move || {
                let mut total = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    match stream.read(frames) {
                        Ok(mut block) => {
                            if !is_valid_audio(&block) {
                                debug!("Dropping garbage capture block");
                                continue;
                            }
                            let mut guard = inner.lock();
                            if guard.phase != RecorderPhase::ManualRecording {
                                break;
                            }
                            if total + block.len() > max_samples {
                                block.truncate(max_samples - total);
                                total += block.len();
                                if !block.is_empty() {
                                    guard.blocks.push(block);
                                }
                                debug!("Manual recording reached max duration");
                                break;
                            }
                            total += block.len();
                            guard.blocks.push(block);
                        }
                        Err(e) => {
                            error!("Recording thread error: {e}");
                            let mut guard = inner.lock();
                            guard.session_error = Some(e.to_string());
                            guard.phase = RecorderPhase::Idle;
                            break;
                        }
                    }
                }
            })
            .map_err(|e| CoreError::StreamFailed(format!("failed to spawn capture thread: {e}")))?;

        *self.thread.lock() = Some(handle);
        info!(
            "Manual recording started (device={}, format={} @ {}Hz)",
            self.config.device_index, self.config.sample_type, self.config.sample_rate
        );
        Ok(())
    }

    /// Stop a manual session and return the captured clip.
    ///
    /// Returns `Ok(None)` when nothing usable was captured (no blocks, or
    /// shorter than the minimum duration).
    ///
    /// # Errors
    ///
    /// Returns `StreamFailed` when the capture thread died on a read error.
    #[allow(clippy::cast_precision_loss)]
    pub fn stop_manual(&self) -> Result<Option<AudioClip>, CoreError> {
        self.stop.store(true, Ordering::Relaxed);
        self.join_capture_thread();

        let (blocks, session_error) = {
            let mut inner = self.inner.lock();
            inner.phase = RecorderPhase::Idle;
            (
                std::mem::take(&mut inner.blocks),
                inner.session_error.take(),
            )
        };

        if let Some(message) = session_error {
            return Err(CoreError::StreamFailed(message));
        }
        if blocks.is_empty() {
            return Ok(None);
        }

        let samples: Vec<f32> = blocks.into_iter().flatten().collect();
        let clip = AudioClip::new(samples, self.config.sample_rate);
        let duration = clip.duration_s();
        if duration < MIN_DURATION_S {
            info!("Recording too short ({duration:.2}s), discarded");
            return Ok(None);
        }

        info!("Manual recording stopped, {duration:.2}s captured");
        Ok(Some(clip))
    }

    /// Begin energy-gated auto listening. Callbacks fire from the capture
    /// thread on speech boundaries; each finished clip arrives through
    /// `on_clip_ready`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpenFailed` when the stream cannot be opened; the
    /// recorder stays `Idle`.
    pub fn start_auto(&self, callbacks: AutoCallbacks) -> Result<(), CoreError> {
        {
            let inner = self.inner.lock();
            if inner.phase != RecorderPhase::Idle {
                warn!("start_auto ignored: recorder is {:?}", inner.phase);
                return Ok(());
            }
        }

        let mut stream = self.open_stream()?;

        {
            let mut inner = self.inner.lock();
            inner.phase = RecorderPhase::AutoWaiting;
            inner.blocks.clear();
            inner.session_error = None;
        }
        self.stop.store(false, Ordering::Relaxed);

        #[allow(clippy::cast_possible_truncation)]
        let frames = (self.config.sample_rate as u64 * AUTO_BLOCK_MS / 1000) as usize;
        let mut machine = AutoVadMachine::new(
            self.config.sample_rate,
            self.config.energy_threshold,
            self.config.silence_ms,
        );
        let sample_rate = self.config.sample_rate;

        let inner = Arc::clone(&self.inner);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::Builder::new()
            .name("voxkey-capture".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match stream.read(frames) {
                        Ok(block) => {
                            if !is_valid_audio(&block) {
                                debug!("Dropping garbage capture block");
                                continue;
                            }
                            let events = machine.push_block(&block);
                            inner.lock().phase = machine.phase();
                            for event in events {
                                match event {
                                    AutoEvent::SpeechStart => (callbacks.on_speech_start)(),
                                    AutoEvent::SpeechEnd => (callbacks.on_speech_end)(),
                                    AutoEvent::ClipReady(samples) => {
                                        let clip = AudioClip::new(samples, sample_rate);
                                        info!(
                                            "Auto-listen captured {:.2}s of speech",
                                            clip.duration_s()
                                        );
                                        (callbacks.on_clip_ready)(clip);
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!("Auto-listen thread error: {e}");
                            let mut guard = inner.lock();
                            guard.session_error = Some(e.to_string());
                            guard.phase = RecorderPhase::Idle;
                            break;
                        }
                    }
                }
            })
            .map_err(|e| CoreError::StreamFailed(format!("failed to spawn capture thread: {e}")))?;

        *self.thread.lock() = Some(handle);
        info!(
            "Auto-listen started (threshold={:.4}, silence={}ms, format={})",
            self.config.energy_threshold, self.config.silence_ms, self.config.sample_type
        );
        Ok(())
    }

    /// Stop auto listening. Idempotent.
    pub fn stop_auto(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.join_capture_thread();
        let mut inner = self.inner.lock();
        inner.phase = RecorderPhase::Idle;
        inner.blocks.clear();
    }

    /// The error that ended the last session, if any.
    #[must_use]
    pub fn take_session_error(&self) -> Option<String> {
        self.inner.lock().session_error.take()
    }

    fn join_capture_thread(&self) {
        if let Some(handle) = self.thread.lock().take() {
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Capture thread did not stop within {STOP_JOIN_TIMEOUT:?}; detaching");
            }
        }
    }
}
