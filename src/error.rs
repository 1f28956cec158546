// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Errors surfaced across the public component boundaries.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("audio device enumeration failed: {0}")]
    DeviceEnumerationFailed(String),

    #[error("failed to open audio device {index}: {reason}")]
    DeviceOpenFailed { index: usize, reason: String },

    #[error("audio stream failed: {0}")]
    StreamFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("failed to bind hotkey '{combo}': {reason}")]
    HotkeyBindFailed { combo: String, reason: String },

    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("decode failed: {0}")]
    Decode(String),
}
