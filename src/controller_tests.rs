// SPDX-License-Identifier: GPL-3.0-only
use crate::audio::backend::SampleType;
use crate::audio::registry::DeviceRegistry;
use crate::controller::{CoreServices, PipelineController};
use crate::error::CoreError;
use crate::events::CoreEvent;
use crate::hotkeys::{HotkeyCombo, HotkeyHandler, OsHotkeyBinder};
use crate::output::{ClipboardService, KeyboardInjector};
use crate::settings::{RecordingMode, Settings};
use crate::testutil::{
    AfterScript, Behavior, FakeEngine, FakeModelScript, ScriptedBackend, seg, silence_samples,
    speech_samples,
};
use crate::transcribe::{Transcriber, TranscriberConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const RATE: u32 = 16_000;

#[derive(Clone, Default)]
struct BinderState {
    press: Arc<Mutex<Vec<(String, HotkeyHandler)>>>,
    release: Arc<Mutex<Vec<(String, HotkeyHandler)>>>,
}

impl BinderState {
    fn press_combo(&self) {
        for (_, handler) in self.press.lock().iter() {
            handler();
        }
    }

    fn release_key(&self) {
        for (_, handler) in self.release.lock().iter() {
            handler();
        }
    }
}

struct FakeBinder {
    state: BinderState,
    fail: bool,
}

impl OsHotkeyBinder for FakeBinder {
    fn bind_press(&mut self, combo: &HotkeyCombo, handler: HotkeyHandler) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::HotkeyBindFailed {
                combo: combo.to_string(),
                reason: "hook refused".to_string(),
            });
        }
        self.state.press.lock().push((combo.to_string(), handler));
        Ok(())
    }

    fn bind_release(&mut self, key: &str, handler: HotkeyHandler) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::HotkeyBindFailed {
                combo: key.to_string(),
                reason: "hook refused".to_string(),
            });
        }
        self.state.release.lock().push((key.to_string(), handler));
        Ok(())
    }

    fn unbind_all(&mut self) {
        self.state.press.lock().clear();
        self.state.release.lock().clear();
    }
}

struct RecordingClipboard(Arc<Mutex<Vec<String>>>);

impl ClipboardService for RecordingClipboard {
    fn set_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.0.lock().push(text.to_string());
        Ok(())
    }
}

struct RecordingInjector(Arc<Mutex<Vec<String>>>);

impl KeyboardInjector for RecordingInjector {
    fn send(&mut self, combo: &HotkeyCombo) -> anyhow::Result<()> {
        self.0.lock().push(combo.to_string());
        Ok(())
    }
}

struct Harness {
    controller: PipelineController,
    binder: BinderState,
    clipboard: Arc<Mutex<Vec<String>>>,
    injector: Arc<Mutex<Vec<String>>>,
}

fn harness(settings: Settings, capture: Vec<f32>, engine_script: FakeModelScript) -> Harness {
    harness_with(settings, capture, engine_script, false)
}

fn harness_with(
    settings: Settings,
    capture: Vec<f32>,
    engine_script: FakeModelScript,
    fail_binder: bool,
) -> Harness {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::device(
        0,
        "Test Microphone",
        "ALSA",
        1,
        RATE,
    )]));
    backend.script(
        0,
        SampleType::F32,
        RATE,
        Behavior::Valid {
            samples: capture,
            after: AfterScript::Eof,
        },
    );

    let binder_state = BinderState::default();
    let clipboard = Arc::new(Mutex::new(Vec::new()));
    let injector = Arc::new(Mutex::new(Vec::new()));

    let services = CoreServices {
        registry: Arc::new(DeviceRegistry::new(backend)),
        transcriber: Transcriber::with_engine(
            TranscriberConfig::default(),
            Box::new(FakeEngine::new(false, engine_script)),
        ),
        clipboard: Box::new(RecordingClipboard(Arc::clone(&clipboard))),
        injector: Box::new(RecordingInjector(Arc::clone(&injector))),
        binder: Box::new(FakeBinder {
            state: binder_state.clone(),
            fail: fail_binder,
        }),
    };

    Harness {
        controller: PipelineController::with_services(settings, services).unwrap(),
        binder: binder_state,
        clipboard,
        injector,
    }
}

async fn wait_for_done(
    events: &mut broadcast::Receiver<CoreEvent>,
    collected: &mut Vec<CoreEvent>,
) -> crate::models::TranscriptionResult {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for transcription")
            .expect("event bus closed");
        collected.push(event.clone());
        if let CoreEvent::TranscriptionDone(result) = event {
            return result;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn push_to_talk_copies_and_pastes_transcript() {
    let settings = Settings::default();
    let harness = harness(
        settings,
        speech_samples(2.0, RATE),
        FakeModelScript {
            vad_on_segments: vec![seg("hello world", 0.0, 2.0)],
            ..FakeModelScript::default()
        },
    );
    let mut events = harness.controller.subscribe();

    harness.controller.bind_hotkeys().unwrap();
    assert_eq!(harness.binder.press.lock().len(), 1);
    assert_eq!(harness.binder.release.lock().len(), 1);

    harness.binder.press_combo();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.binder.release_key();

    let mut collected = Vec::new();
    let result = wait_for_done(&mut events, &mut collected).await;

    assert_eq!(result.text, "hello world");
    assert!(
        matches!(collected.first(), Some(CoreEvent::RecordingStarted)),
        "first event should be recording_started"
    );
    assert!(
        collected
            .iter()
            .any(|e| matches!(e, CoreEvent::RecordingStopped)),
        "recording_stopped must fire"
    );
    assert_eq!(harness.clipboard.lock().as_slice(), &["hello world".to_string()]);
    assert_eq!(harness.injector.lock().len(), 1, "one paste keystroke");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_result_notifies_without_side_effects() {
    let harness = harness(
        Settings::default(),
        silence_samples(2.0, RATE),
        FakeModelScript::default(),
    );
    let mut events = harness.controller.subscribe();

    harness.controller.toggle_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.controller.toggle_recording().unwrap();

    let mut collected = Vec::new();
    let result = wait_for_done(&mut events, &mut collected).await;

    assert_eq!(result.text, "");
    assert!(harness.clipboard.lock().is_empty());
    assert!(harness.injector.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_mid_transcribe_discards_the_clip() {
    let script = FakeModelScript {
        vad_on_segments: (0..200)
            .map(|i| seg("word", i as f32, i as f32 + 1.0))
            .collect(),
        delay_per_segment: Duration::from_millis(100),
        ..FakeModelScript::default()
    };
    let harness = harness(Settings::default(), speech_samples(2.0, RATE), script);
    let mut events = harness.controller.subscribe();

    harness.controller.toggle_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.controller.toggle_recording().unwrap();

    // Let the worker get into the decode loop, then cancel.
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.controller.cancel_transcription();

    let mut collected = Vec::new();
    let result = wait_for_done(&mut events, &mut collected).await;

    assert_eq!(result.text, "");
    assert_eq!(
        result.debug_info.passes[0].stop_reason,
        crate::models::StopReason::Cancelled
    );
    assert!(harness.clipboard.lock().is_empty());
    assert!(harness.injector.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_clip_is_dropped_while_one_is_in_flight() {
    let settings = Settings {
        auto_paste: false,
        ..Settings::default()
    };
    let script = FakeModelScript {
        vad_on_segments: (0..10)
            .map(|i| seg("slow", i as f32, i as f32 + 1.0))
            .collect(),
        delay_per_segment: Duration::from_millis(40),
        ..FakeModelScript::default()
    };
    let harness = harness(settings, speech_samples(2.0, RATE), script);
    let mut events = harness.controller.subscribe();

    // First clip starts a slow transcription.
    harness.controller.toggle_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.controller.toggle_recording().unwrap();

    // Second clip arrives while the first is still decoding.
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.controller.toggle_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness.controller.toggle_recording().unwrap();

    let mut collected = Vec::new();
    let first = wait_for_done(&mut events, &mut collected).await;
    assert_eq!(first.text, "slow ".repeat(10).trim());

    // The dropped clip must not produce a second result.
    let extra = tokio::time::timeout(Duration::from_millis(600), async {
        loop {
            match events.recv().await {
                Ok(CoreEvent::TranscriptionDone(_)) => break true,
                Ok(_) => {}
                Err(_) => break false,
            }
        }
    })
    .await;
    assert!(extra.is_err(), "second transcription should have been dropped");
    assert_eq!(harness.clipboard.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_mode_transcribes_each_utterance() {
    let settings = Settings {
        recording_mode: RecordingMode::Auto,
        auto_paste: false,
        ..Settings::default()
    };
    let mut capture = speech_samples(1.0, RATE);
    capture.extend(silence_samples(1.5, RATE));
    let harness = harness(
        settings,
        capture,
        FakeModelScript {
            vad_on_segments: vec![seg("hi there", 0.0, 1.0)],
            ..FakeModelScript::default()
        },
    );
    let mut events = harness.controller.subscribe();

    harness.controller.start_listening().unwrap();
    let mut collected = Vec::new();
    let result = wait_for_done(&mut events, &mut collected).await;
    harness.controller.stop_listening();

    assert_eq!(result.text, "hi there");
    assert!(collected
        .iter()
        .any(|e| matches!(e, CoreEvent::RecordingStarted)));
    assert!(collected
        .iter()
        .any(|e| matches!(e, CoreEvent::RecordingStopped)));
    assert_eq!(harness.clipboard.lock().as_slice(), &["hi there".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn toggle_mode_binds_a_single_press_hook() {
    let settings = Settings {
        recording_mode: RecordingMode::Toggle,
        ..Settings::default()
    };
    let harness = harness(settings, speech_samples(1.0, RATE), FakeModelScript::default());

    harness.controller.bind_hotkeys().unwrap();
    assert_eq!(harness.binder.press.lock().len(), 1);
    assert!(harness.binder.release.lock().is_empty());

    // Rebinding tears down the old hook before installing the new one.
    harness.controller.bind_hotkeys().unwrap();
    assert_eq!(harness.binder.press.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn hotkey_bind_failure_is_reported_but_not_fatal() {
    let harness = harness_with(
        Settings::default(),
        speech_samples(1.0, RATE),
        FakeModelScript {
            vad_on_segments: vec![seg("still works", 0.0, 1.0)],
            ..FakeModelScript::default()
        },
        true,
    );
    let mut events = harness.controller.subscribe();

    let err = harness.controller.bind_hotkeys().unwrap_err();
    assert!(matches!(err, CoreError::HotkeyBindFailed { .. }));
    let status = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(status, CoreEvent::Status(m) if m.contains("Hotkey")));

    // Recording still works through the public operation.
    harness.controller.toggle_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    harness.controller.toggle_recording().unwrap();
    let mut collected = Vec::new();
    let result = wait_for_done(&mut events, &mut collected).await;
    assert_eq!(result.text, "still works");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_settings_refuse_construction() {
    let backend = Arc::new(ScriptedBackend::new(Vec::new()));
    let services = CoreServices {
        registry: Arc::new(DeviceRegistry::new(backend)),
        transcriber: Transcriber::with_engine(
            TranscriberConfig::default(),
            Box::new(FakeEngine::new(false, FakeModelScript::default())),
        ),
        clipboard: Box::new(RecordingClipboard(Arc::new(Mutex::new(Vec::new())))),
        injector: Box::new(RecordingInjector(Arc::new(Mutex::new(Vec::new())))),
        binder: Box::new(FakeBinder {
            state: BinderState::default(),
            fail: false,
        }),
    };
    let settings = Settings {
        silence_ms: 5,
        ..Settings::default()
    };
    let err = PipelineController::with_services(settings, services).unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidSetting {
            field: "silence_ms",
            ..
        }
    ));
}
