// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline controller: wires the registry, recorder, and transcriber
//! together, binds global hotkeys, and routes finished text to the
//! clipboard and the focused window.

use crate::audio::backend::DeviceDescriptor;
use crate::audio::recorder::{AutoCallbacks, Recorder, RecorderConfig};
use crate::audio::registry::{DEFAULT_SAMPLE_RATE, DeviceRegistry, ProbeResult};
use crate::error::CoreError;
use crate::events::{CoreEvent, EventBus};
use crate::hotkeys::{HotkeyCombo, OsHotkeyBinder, RdevHotkeyBinder};
use crate::models::AudioClip;
use crate::output::{ArboardClipboard, ClipboardService, EnigoInjector, KeyboardInjector};
use crate::settings::{RecordingMode, Settings};
use crate::transcribe::{CancelSignal, Observers, Transcriber, TranscriberConfig};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

// Delay before the paste keystroke so focus can return to the target window.
const PASTE_DELAY: Duration = Duration::from_millis(150);
#[cfg(not(target_os = "macos"))]
const PASTE_COMBO: &str = "ctrl+v";
#[cfg(target_os = "macos")]
const PASTE_COMBO: &str = "win+v";

/// The injected services a controller runs on. `native()` gives the real OS
/// stack; tests substitute scripted fakes.
pub struct CoreServices {
    pub registry: Arc<DeviceRegistry>,
    pub transcriber: Transcriber,
    pub clipboard: Box<dyn ClipboardService>,
    pub injector: Box<dyn KeyboardInjector>,
    pub binder: Box<dyn OsHotkeyBinder>,
}

impl CoreServices {
    #[must_use]
    pub fn native(transcriber_config: TranscriberConfig) -> Self {
        Self {
            registry: Arc::new(DeviceRegistry::default()),
            transcriber: Transcriber::new(transcriber_config),
            clipboard: Box::new(ArboardClipboard::new()),
            injector: Box::new(EnigoInjector::new()),
            binder: Box::new(RdevHotkeyBinder::new()),
        }
    }
}

struct ControllerInner {
    settings: Settings,
    registry: Arc<DeviceRegistry>,
    transcriber: Mutex<Transcriber>,
    clipboard: Mutex<Box<dyn ClipboardService>>,
    injector: Mutex<Box<dyn KeyboardInjector>>,
    binder: Mutex<Box<dyn OsHotkeyBinder>>,
    events: EventBus,
    recorder: Mutex<Option<Arc<Recorder>>>,
    in_flight: AtomicBool,
    current_cancel: Mutex<Option<CancelSignal>>,
    manual_active: AtomicBool,
}

pub struct PipelineController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController").finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Build a controller over the native OS services.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSetting` when the settings violate an invariant.
    pub fn new(settings: Settings) -> Result<Self, CoreError> {
        let transcriber_config = TranscriberConfig {
            model: settings.model,
            language: settings.language.clone(),
            ..TranscriberConfig::default()
        };
        Self::with_services(settings, CoreServices::native(transcriber_config))
    }

    /// Build a controller over explicit services.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSetting` when the settings violate an invariant.
    pub fn with_services(settings: Settings, services: CoreServices) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(ControllerInner {
                settings,
                registry: services.registry,
                transcriber: Mutex::new(services.transcriber),
                clipboard: Mutex::new(services.clipboard),
                injector: Mutex::new(services.injector),
                binder: Mutex::new(services.binder),
                events: EventBus::new(),
                recorder: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                current_cancel: Mutex::new(None),
                manual_active: AtomicBool::new(false),
            }),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Register the global hotkeys for the configured recording mode,
    /// tearing down any previous hooks first. Binding failure leaves the
    /// controller usable; the caller decides whether to continue without
    /// hotkeys.
    ///
    /// # Errors
    ///
    /// Returns `HotkeyBindFailed` (reported to observers as well).
    pub fn bind_hotkeys(&self) -> Result<(), CoreError> {
        let result = self.try_bind_hotkeys();
        if let Err(e) = &result {
            warn!("Hotkey registration failed: {e}");
            self.inner
                .events
                .emit(CoreEvent::Status(format!("Hotkey registration failed: {e}")));
        }
        result
    }

    fn try_bind_hotkeys(&self) -> Result<(), CoreError> {
        let mut binder = self.inner.binder.lock();
        binder.unbind_all();

        match self.inner.settings.recording_mode {
            RecordingMode::PushToTalk => {
                let combo = HotkeyCombo::parse(&self.inner.settings.hotkeys.push_to_talk)?;
                let press_inner = Arc::clone(&self.inner);
                binder.bind_press(
                    &combo,
                    Box::new(move || press_inner.handle_ptt_press()),
                )?;
                let release_inner = Arc::clone(&self.inner);
                binder.bind_release(
                    &combo.key,
                    Box::new(move || release_inner.handle_ptt_release()),
                )?;
                info!("Bound push-to-talk hotkey '{combo}'");
            }
            RecordingMode::Toggle => {
                let combo = HotkeyCombo::parse(&self.inner.settings.hotkeys.toggle)?;
                let toggle_inner = Arc::clone(&self.inner);
                binder.bind_press(&combo, Box::new(move || toggle_inner.handle_toggle()))?;
                info!("Bound toggle hotkey '{combo}'");
            }
            RecordingMode::Auto => {
                debug!("Auto mode uses no hotkeys; listening is started explicitly");
            }
        }
        Ok(())
    }

    /// Alternate between starting and stopping a manual recording.
    ///
    /// # Errors
    ///
    /// Returns device errors from the underlying session transition.
    pub fn toggle_recording(&self) -> Result<(), CoreError> {
        if self.inner.manual_active.load(Ordering::SeqCst) {
            self.inner.stop_manual_session()
        } else {
            self.inner.start_manual_session()
        }
    }

    /// Start energy-gated auto listening.
    ///
    /// # Errors
    ///
    /// Returns enumeration or device-open errors.
    pub fn start_listening(&self) -> Result<(), CoreError> {
        self.inner.start_auto_session()
    }

    /// Stop auto listening. Idempotent.
    pub fn stop_listening(&self) {
        if let Some(recorder) = self.inner.recorder.lock().clone() {
            recorder.stop_auto();
            if let Some(message) = recorder.take_session_error() {
                self.inner
                    .events
                    .emit(CoreEvent::Status(format!("Recording failed: {message}")));
            }
        }
    }

    /// Cancel the in-flight transcription, if any. The pass terminates at
    /// its next segment boundary and the clip is discarded.
    pub fn cancel_transcription(&self) {
        let guard = self.inner.current_cancel.lock();
        if let Some(cancel) = guard.as_ref() {
            cancel.set();
            info!("Cancellation requested for in-flight transcription");
            self.inner
                .events
                .emit(CoreEvent::Status("Cancelling transcription…".to_string()));
        }
    }

    /// Start the RMS level meter on the session device.
    ///
    /// # Errors
    ///
    /// Returns enumeration or device-open errors.
    pub fn start_level_meter(&self, callback: Box<dyn Fn(f32) + Send>) -> Result<(), CoreError> {
        let device = self.inner.pick_device()?;
        self.inner
            .registry
            .start_level_monitor(device.index, callback, 0.05)
    }

    pub fn stop_level_meter(&self) {
        self.inner.registry.stop_level_monitor();
    }

    /// Tear down hotkeys, monitors, and any active capture session.
    pub fn shutdown(&self) {
        self.inner.binder.lock().unbind_all();
        self.inner.registry.stop_level_monitor();
        if let Some(recorder) = self.inner.recorder.lock().clone() {
            recorder.stop_auto();
        }
        if let Some(cancel) = self.inner.current_cancel.lock().as_ref() {
            cancel.set();
        }
    }
}

impl ControllerInner {
    fn pick_device(&self) -> Result<DeviceDescriptor, CoreError> {
        let selected_name = &self.settings.selected_device_name;
        if !selected_name.is_empty() {
            if let Some(device) = self
                .registry
                .list_devices()?
                .into_iter()
                .find(|d| &d.name == selected_name)
            {
                return Ok(device);
            }
            warn!("Selected device '{selected_name}' not found; falling back to best working");
        }
        self.registry
            .best_working_device()?
            .ok_or_else(|| CoreError::DeviceEnumerationFailed("no input devices".to_string()))
    }

    fn prepare_recorder(&self) -> Result<Arc<Recorder>, CoreError> {
        if let Some(recorder) = self.recorder.lock().clone() {
            return Ok(recorder);
        }

        let device = self.pick_device()?;
        let format = self
            .registry
            .probe(device.index, Some(DEFAULT_SAMPLE_RATE))
            .unwrap_or_else(|| {
                warn!(
                    "Probing device '{}' failed; using default format",
                    device.name
                );
                ProbeResult {
                    sample_type: crate::audio::backend::SampleType::F32,
                    sample_rate: DEFAULT_SAMPLE_RATE,
                }
            });

        info!(
            "Using device [{}] {} ({} @ {}Hz)",
            device.index, device.name, format.sample_type, format.sample_rate
        );
        let recorder = Arc::new(Recorder::new(
            self.registry.backend(),
            RecorderConfig {
                device_index: device.index,
                sample_rate: format.sample_rate,
                channels: 1,
                sample_type: format.sample_type,
                energy_threshold: self.settings.energy_threshold,
                silence_ms: self.settings.silence_ms,
            },
        ));
        *self.recorder.lock() = Some(Arc::clone(&recorder));
        Ok(recorder)
    }

    fn start_manual_session(&self) -> Result<(), CoreError> {
        let recorder = self.prepare_recorder()?;
        recorder.start_manual()?;
        self.manual_active.store(true, Ordering::SeqCst);
        self.events.emit(CoreEvent::RecordingStarted);
        Ok(())
    }

    fn stop_manual_session(self: &Arc<Self>) -> Result<(), CoreError> {
        self.manual_active.store(false, Ordering::SeqCst);
        self.events.emit(CoreEvent::RecordingStopped);

        let Some(recorder) = self.recorder.lock().clone() else {
            return Ok(());
        };
        match recorder.stop_manual() {
            Ok(Some(clip)) => {
                self.enqueue_clip(clip);
                Ok(())
            }
            Ok(None) => {
                debug!("Manual session produced no usable clip");
                Ok(())
            }
            Err(e) => {
                error!("Recording session failed: {e}");
                self.events
                    .emit(CoreEvent::Status(format!("Recording failed: {e}")));
                Err(e)
            }
        }
    }

    fn start_auto_session(self: &Arc<Self>) -> Result<(), CoreError> {
        let recorder = self.prepare_recorder()?;
        let start_inner = Arc::clone(self);
        let end_inner = Arc::clone(self);
        let clip_inner = Arc::clone(self);
        recorder.start_auto(AutoCallbacks {
            on_speech_start: Box::new(move || {
                start_inner.events.emit(CoreEvent::RecordingStarted);
            }),
            on_speech_end: Box::new(move || {
                end_inner.events.emit(CoreEvent::RecordingStopped);
            }),
            on_clip_ready: Box::new(move |clip| {
                clip_inner.enqueue_clip(clip);
            }),
        })
    }

    /// Hand a clip to the transcription worker. At most one transcription
    /// runs at a time; clips arriving while one is in flight are dropped.
    fn enqueue_clip(self: &Arc<Self>, clip: AudioClip) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            info!("Transcription in flight; dropping new clip ({:.2}s)", clip.duration_s());
            return;
        }

        let cancel = CancelSignal::new();
        *self.current_cancel.lock() = Some(cancel.clone());

        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("voxkey-transcribe".to_string())
            .spawn(move || {
                let status_bus = inner.events.clone();
                let on_status =
                    move |message: &str| status_bus.emit(CoreEvent::Status(message.to_string()));
                let debug_bus = inner.events.clone();
                let on_debug = move |mut event: serde_json::Value| {
                    if let Some(map) = event.as_object_mut() {
                        map.insert(
                            "timestamp".to_string(),
                            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
                        );
                    }
                    debug_bus.emit(CoreEvent::Debug(event));
                };
                let observers = Observers {
                    on_status: Some(&on_status),
                    on_debug: Some(&on_debug),
                };

                let outcome = inner
                    .transcriber
                    .lock()
                    .transcribe(&clip, &cancel, &observers);
                match outcome {
                    Ok(result) => inner.deliver(result),
                    Err(e) => {
                        error!("Transcription failed: {e}");
                        inner
                            .events
                            .emit(CoreEvent::Status(format!("Transcription failed: {e}")));
                    }
                }

                *inner.current_cancel.lock() = None;
                inner.in_flight.store(false, Ordering::SeqCst);
            });

        if let Err(e) = spawned {
            error!("Failed to spawn transcription worker: {e}");
            *self.current_cancel.lock() = None;
            self.in_flight.store(false, Ordering::SeqCst);
        }
    }

    fn deliver(&self, result: crate::models::TranscriptionResult) {
        if result.text.trim().is_empty() {
            info!("No speech detected");
        } else {
            if self.settings.auto_copy {
                if let Err(e) = self.clipboard.lock().set_text(&result.text) {
                    warn!("Clipboard write failed: {e}");
                }
            }
            if self.settings.auto_paste {
                std::thread::sleep(PASTE_DELAY);
                match HotkeyCombo::parse(PASTE_COMBO) {
                    Ok(combo) => {
                        if let Err(e) = self.injector.lock().send(&combo) {
                            warn!("Paste keystroke failed: {e}");
                        }
                    }
                    Err(e) => warn!("Invalid paste combo: {e}"),
                }
            }
        }
        self.events.emit(CoreEvent::TranscriptionDone(result));
    }

    fn handle_ptt_press(self: &Arc<Self>) {
        if self.manual_active.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.start_manual_session() {
            error!("Push-to-talk start failed: {e}");
            self.events
                .emit(CoreEvent::Status(format!("Recording failed: {e}")));
        }
    }

    fn handle_ptt_release(self: &Arc<Self>) {
        if !self.manual_active.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_manual_session();
    }

    fn handle_toggle(self: &Arc<Self>) {
        let result = if self.manual_active.load(Ordering::SeqCst) {
            self.stop_manual_session()
        } else {
            self.start_manual_session()
        };
        if let Err(e) = result {
            error!("Toggle recording failed: {e}");
        }
    }
}
