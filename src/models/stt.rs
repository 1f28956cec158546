// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};

/// A single decoded segment with timestamps relative to the clip start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionSegment {
    pub text: String,
    pub start_s: f32,
    pub end_s: f32,
    pub avg_log_prob: f32,
}

/// Why a decode pass stopped consuming the segment stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Eof,
    Cancelled,
    SegmentCap,
    HardTimeout,
    PassTimeout,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => write!(f, "eof"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SegmentCap => write!(f, "segment_cap"),
            Self::HardTimeout => write!(f, "hard_timeout"),
            Self::PassTimeout => write!(f, "pass_timeout"),
        }
    }
}

/// Per-pass record kept in `DebugInfo.passes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassDebug {
    pub name: String,
    pub use_vad: bool,
    pub segment_count: usize,
    pub stop_reason: StopReason,
    pub elapsed_ms: f64,
}

/// Input-audio statistics captured before decoding.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioStats {
    pub duration_s: f32,
    pub rms: f32,
    pub peak: f32,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebugInfo {
    pub audio: AudioStats,
    pub passes: Vec<PassDebug>,
    pub selected_pass: String,
    pub processing_time_ms: f64,
}

/// Result of one transcription run. An empty `text` is a legitimate
/// "no speech detected" outcome, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
    pub language_confidence: f32,
    pub audio_duration_s: f32,
    pub processing_time_ms: f64,
    pub segments: Vec<TranscriptionSegment>,
    pub model_name: String,
    pub debug_info: DebugInfo,
}

impl TranscriptionResult {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn words_per_minute(&self) -> f32 {
        if self.audio_duration_s <= 0.0 || self.text.trim().is_empty() {
            return 0.0;
        }
        let words = self.text.split_whitespace().count() as f32;
        (words / self.audio_duration_s) * 60.0
    }
}
