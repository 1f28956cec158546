// SPDX-License-Identifier: GPL-3.0-only
pub mod audio;
pub mod stt;
pub mod stt_model;

pub use audio::AudioClip;
pub use stt::{
    AudioStats, DebugInfo, PassDebug, StopReason, TranscriptionResult, TranscriptionSegment,
};
pub use stt_model::{ComputeKind, DeviceKind, WhisperModelId};
