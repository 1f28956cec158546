// SPDX-License-Identifier: GPL-3.0-only
pub mod engine;
pub mod transcriber;
#[cfg(test)]
mod transcriber_tests;
pub mod whisper;

pub use engine::{
    DecodeInfo, DecodeOptions, EngineError, EngineSegment, ModelEngine, SegmentFlow, SpeechModel,
    VadParams,
};
pub use transcriber::{Observers, Transcriber, TranscriberConfig};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe cooperative cancellation flag. Workers poll it at pass entry
/// and at every segment boundary; setting it never interrupts a segment
/// decode in progress.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
