// SPDX-License-Identifier: GPL-3.0-only

//! Background RMS level monitor, independent of capture.

use crate::audio::backend::InputStream;
use crate::audio::processing::{is_valid_audio, rms};
use log::{error, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A running level-monitor thread. Reads fixed-size chunks and reports their
/// RMS through the callback; invalid reads report 0.0.
pub struct LevelMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LevelMonitor {
    pub(crate) fn start(
        mut stream: Box<dyn InputStream>,
        chunk_frames: usize,
        callback: Box<dyn Fn(f32) + Send>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("voxkey-level".to_string())
            .spawn(move || {
                while !stop_for_thread.load(Ordering::Relaxed) {
                    match stream.read(chunk_frames) {
                        Ok(block) => {
                            let level = if is_valid_audio(&block) { rms(&block) } else { 0.0 };
                            // A panicking callback must not take down the
                            // monitor loop.
                            if catch_unwind(AssertUnwindSafe(|| callback(level))).is_err() {
                                warn!("Level callback panicked; continuing");
                            }
                        }
                        Err(e) => {
                            error!("Level monitor error: {e}");
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn level monitor thread");

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the reader to stop and wait briefly for it to finish.
    /// Idempotent; a reader blocked on a dead device is detached.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Level monitor did not stop within {STOP_JOIN_TIMEOUT:?}; detaching");
            }
        }
    }
}

impl Drop for LevelMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
