// SPDX-License-Identifier: GPL-3.0-only

//! The speech-engine boundary.
//!
//! A `ModelEngine` owns weights loading; a `SpeechModel` decodes one clip at
//! a time, handing each segment to a sink that can stop the stream. The sink
//! is how cancellation, segment caps, and wall-clock deadlines take effect
//! without a second worker thread: the transcriber polls at every segment
//! boundary, and the engine itself honors `deadline` inside long decodes.

use crate::models::{ComputeKind, DeviceKind, WhisperModelId};
use crate::transcribe::CancelSignal;
use std::time::Instant;
use thiserror::Error;

/// Voice-activity-detection front-end parameters for a decode pass.
#[derive(Debug, Clone, Copy)]
pub struct VadParams {
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    pub speech_pad_ms: u32,
}

impl Default for VadParams {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            min_speech_duration_ms: 200,
            min_silence_duration_ms: 300,
            speech_pad_ms: 250,
        }
    }
}

/// Per-pass decode settings handed to the engine.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub language: String,
    pub beam_size: usize,
    pub vad_filter: bool,
    pub vad: VadParams,
    pub condition_on_previous_text: bool,
    pub temperature: f32,
    pub no_speech_threshold: f32,
    pub compression_ratio_threshold: f32,
    pub log_prob_threshold: f32,
    pub word_timestamps: bool,
    pub deadline: Instant,
    pub cancel: CancelSignal,
}

/// One segment produced by the engine, timestamps relative to clip start.
#[derive(Debug, Clone)]
pub struct EngineSegment {
    pub text: String,
    pub start_s: f32,
    pub end_s: f32,
    pub avg_log_prob: f32,
}

/// Stream-level metadata reported alongside the segments.
#[derive(Debug, Clone)]
pub struct DecodeInfo {
    pub language: String,
    pub language_probability: f32,
    pub duration_s: f32,
}

/// Sink verdict after each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFlow {
    Continue,
    Stop,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(String),
    #[error("decode deadline exceeded")]
    DeadlineExceeded,
    #[error("decode failed: {0}")]
    Decode(String),
}

impl EngineError {
    pub(crate) fn load(err: &anyhow::Error) -> Self {
        Self::Load(format!("{err:#}"))
    }

    pub(crate) fn decode(err: &anyhow::Error) -> Self {
        Self::Decode(format!("{err:#}"))
    }
}

/// A loaded model ready to decode clips.
pub trait SpeechModel: Send {
    /// Decode `audio` (mono f32 at `sample_rate`), feeding segments to
    /// `sink` until the stream ends or the sink stops it.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` when `opts.deadline` expires before the
    /// first segment is ready; other failures are `Decode`.
    fn transcribe(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
        opts: &DecodeOptions,
        sink: &mut dyn FnMut(EngineSegment) -> SegmentFlow,
    ) -> Result<DecodeInfo, EngineError>;
}

/// Factory for loaded models; owns hardware detection.
pub trait ModelEngine: Send {
    /// Whether a CUDA-capable device is available.
    fn gpu_available(&self) -> bool;

    /// Load (or reuse cached weights for) the given model.
    ///
    /// # Errors
    ///
    /// Returns `Load` when weights cannot be fetched or initialized.
    fn load(
        &self,
        model: WhisperModelId,
        device: DeviceKind,
        compute: ComputeKind,
    ) -> Result<Box<dyn SpeechModel>, EngineError>;
}
