// SPDX-License-Identifier: GPL-3.0-only

use crate::models::TranscriptionResult;
use tokio::sync::broadcast;

/// Typed event stream emitted by the pipeline core.
///
/// Events originate on worker threads; subscribers must marshal to their own
/// UI thread as needed.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Status(String),
    Debug(serde_json::Value),
    RecordingStarted,
    RecordingStopped,
    TranscriptionDone(TranscriptionResult),
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bounded broadcast bus for [`CoreEvent`]. Sends never block; events are
/// dropped for receivers that lag behind capacity.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: CoreEvent) {
        // No subscribers is fine; the bus is fire-and-forget.
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}
