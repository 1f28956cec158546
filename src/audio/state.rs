// SPDX-License-Identifier: GPL-3.0-only

//! Recorder phases and the energy-gate auto-listen state machine.
//!
//! The machine is pure: it consumes fixed-size blocks and measures time in
//! samples, so block cadence is the only clock and tests are deterministic.

use crate::audio::processing::rms;
use log::debug;

pub const MIN_DURATION_S: f32 = 0.3;
pub const MAX_DURATION_S: f32 = 30.0;

/// Block cadence for the two capture modes.
pub const AUTO_BLOCK_MS: u64 = 100;
pub const MANUAL_BLOCK_MS: u64 = 500;

// Trailing silence retained on a finalized clip.
const TRAILING_KEEP_MS: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    ManualRecording,
    AutoWaiting,
    AutoSpeech,
    AutoTrailingSilence,
}

#[derive(Debug)]
pub(crate) enum AutoEvent {
    SpeechStart,
    SpeechEnd,
    ClipReady(Vec<f32>),
}

pub(crate) struct AutoVadMachine {
    phase: RecorderPhase,
    energy_threshold: f32,
    buffer: Vec<f32>,
    silence_samples: usize,
    min_samples: usize,
    max_samples: usize,
    silence_limit: usize,
    trailing_keep: usize,
}

impl AutoVadMachine {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn new(sample_rate: u32, energy_threshold: f32, silence_ms: u32) -> Self {
        let per_ms = sample_rate as usize / 1000;
        Self {
            phase: RecorderPhase::AutoWaiting,
            energy_threshold,
            buffer: Vec::new(),
            silence_samples: 0,
            min_samples: (MIN_DURATION_S * sample_rate as f32) as usize,
            max_samples: (MAX_DURATION_S * sample_rate as f32) as usize,
            silence_limit: silence_ms as usize * per_ms,
            trailing_keep: TRAILING_KEEP_MS as usize * per_ms,
        }
    }

    pub(crate) fn phase(&self) -> RecorderPhase {
        self.phase
    }

    /// Feed one capture block; returns the callbacks to fire, in order.
    pub(crate) fn push_block(&mut self, block: &[f32]) -> Vec<AutoEvent> {
        let mut events = Vec::new();
        let level = rms(block);
        let speech = level >= self.energy_threshold;

        match self.phase {
            RecorderPhase::AutoWaiting => {
                if speech {
                    self.buffer.clear();
                    self.buffer.extend_from_slice(block);
                    self.silence_samples = 0;
                    self.phase = RecorderPhase::AutoSpeech;
                    events.push(AutoEvent::SpeechStart);
                }
            }
            RecorderPhase::AutoSpeech => {
                self.buffer.extend_from_slice(block);
                if !speech {
                    self.phase = RecorderPhase::AutoTrailingSilence;
                    self.silence_samples = block.len();
                }
                if self.buffer.len() >= self.max_samples {
                    self.finalize(&mut events);
                }
            }
            RecorderPhase::AutoTrailingSilence => {
                self.buffer.extend_from_slice(block);
                if speech {
                    self.phase = RecorderPhase::AutoSpeech;
                    self.silence_samples = 0;
                    if self.buffer.len() >= self.max_samples {
                        self.finalize(&mut events);
                    }
                } else {
                    self.silence_samples += block.len();
                    if self.silence_samples >= self.silence_limit
                        || self.buffer.len() >= self.max_samples
                    {
                        self.finalize(&mut events);
                    }
                }
            }
            RecorderPhase::Idle | RecorderPhase::ManualRecording => {}
        }

        events
    }

    #[allow(clippy::cast_precision_loss)]
    fn finalize(&mut self, events: &mut Vec<AutoEvent>) {
        events.push(AutoEvent::SpeechEnd);

        // Trim trailing silence down to a short retained tail.
        let keep = self.trailing_keep.min(self.silence_samples);
        let trim = self.silence_samples - keep;
        let mut clip = std::mem::take(&mut self.buffer);
        clip.truncate(clip.len().saturating_sub(trim));
        clip.truncate(self.max_samples);

        self.silence_samples = 0;
        self.phase = RecorderPhase::AutoWaiting;

        if clip.len() >= self.min_samples {
            events.push(AutoEvent::ClipReady(clip));
        } else {
            debug!(
                "Auto-listen clip too short ({} samples), discarded",
                clip.len()
            );
        }
    }
}
