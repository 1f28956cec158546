// SPDX-License-Identifier: GPL-3.0-only
use crate::audio::backend::SampleType;
use crate::audio::recorder::{AutoCallbacks, Recorder, RecorderConfig};
use crate::audio::state::RecorderPhase;
use crate::error::CoreError;
use crate::models::AudioClip;
use crate::testutil::{AfterScript, Behavior, ScriptedBackend, silence_samples, speech_samples};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

const RATE: u32 = 16_000;

fn config(device_index: usize) -> RecorderConfig {
    RecorderConfig {
        device_index,
        sample_rate: RATE,
        channels: 1,
        sample_type: SampleType::F32,
        energy_threshold: 0.01,
        silence_ms: 1_200,
    }
}

fn backend_with_script(samples: Vec<f32>, after: AfterScript) -> Arc<ScriptedBackend> {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::device(
        0, "Test Mic", "ALSA", 1, RATE,
    )]));
    backend.script(0, SampleType::F32, RATE, Behavior::Valid { samples, after });
    backend
}

fn wait_for_phase(recorder: &Recorder, phase: RecorderPhase, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if recorder.phase() == phase {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    recorder.phase() == phase
}

#[test]
fn manual_session_captures_scripted_audio() {
    let backend = backend_with_script(speech_samples(1.0, RATE), AfterScript::Eof);
    let recorder = Recorder::new(backend, config(0));

    recorder.start_manual().unwrap();
    assert_eq!(recorder.phase(), RecorderPhase::ManualRecording);
    std::thread::sleep(Duration::from_millis(60));

    let clip = recorder.stop_manual().unwrap().expect("captured clip");
    assert_eq!(recorder.phase(), RecorderPhase::Idle);
    assert_eq!(clip.sample_rate, RATE);
    assert!((clip.duration_s() - 1.0).abs() < 0.01, "{}", clip.duration_s());
    assert!(clip.peak() < 2.0);
    assert!(clip.samples.iter().all(|s| s.is_finite()));
}

#[test]
fn manual_session_shorter_than_minimum_returns_none() {
    let backend = backend_with_script(speech_samples(0.2, RATE), AfterScript::Eof);
    let recorder = Recorder::new(backend, config(0));

    recorder.start_manual().unwrap();
    std::thread::sleep(Duration::from_millis(40));
    assert!(recorder.stop_manual().unwrap().is_none());
}

#[test]
fn manual_session_with_no_audio_returns_none() {
    let backend = backend_with_script(Vec::new(), AfterScript::Eof);
    let recorder = Recorder::new(backend, config(0));

    recorder.start_manual().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert!(recorder.stop_manual().unwrap().is_none());
}

#[test]
fn manual_capture_is_capped_at_max_duration() {
    // 35 s of scripted speech; the capture loop must stop keeping blocks at 30 s.
    let backend = backend_with_script(speech_samples(35.0, RATE), AfterScript::Eof);
    let recorder = Recorder::new(backend, config(0));

    recorder.start_manual().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let clip = recorder.stop_manual().unwrap().expect("capped clip");
    assert!(clip.duration_s() <= 30.0 + f32::EPSILON, "{}", clip.duration_s());
    assert!(clip.duration_s() > 29.9);
}

#[test]
fn open_failure_leaves_recorder_idle() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::device(
        0, "Test Mic", "ALSA", 1, RATE,
    )]));
    backend.script(
        0,
        SampleType::F32,
        RATE,
        Behavior::OpenFail("busy".to_string()),
    );
    let recorder = Recorder::new(backend, config(0));

    let err = recorder.start_manual().unwrap_err();
    assert!(matches!(err, CoreError::DeviceOpenFailed { index: 0, .. }));
    assert_eq!(recorder.phase(), RecorderPhase::Idle);
}

#[test]
fn mid_stream_error_surfaces_on_stop() {
    let backend = backend_with_script(
        speech_samples(0.5, RATE),
        AfterScript::Error("device unplugged".to_string()),
    );
    let recorder = Recorder::new(backend, config(0));

    recorder.start_manual().unwrap();
    assert!(wait_for_phase(&recorder, RecorderPhase::Idle, Duration::from_secs(1)));
    let err = recorder.stop_manual().unwrap_err();
    assert!(matches!(err, CoreError::StreamFailed(_)));
}

#[test]
fn garbage_blocks_are_dropped_from_manual_capture() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::device(
        0, "Test Mic", "ALSA", 1, RATE,
    )]));
    backend.script(0, SampleType::F32, RATE, Behavior::Garbage);
    let recorder = Recorder::new(backend, config(0));

    recorder.start_manual().unwrap();
    std::thread::sleep(Duration::from_millis(40));
    // Every block was garbage, so nothing was kept.
    assert!(recorder.stop_manual().unwrap().is_none());
}

#[test]
fn auto_mode_emits_two_clips_for_double_utterance() {
    let mut samples = speech_samples(1.0, RATE);
    samples.extend(silence_samples(1.5, RATE));
    samples.extend(speech_samples(1.0, RATE));
    samples.extend(silence_samples(1.3, RATE));
    let backend = backend_with_script(samples, AfterScript::Eof);
    let recorder = Recorder::new(backend, config(0));

    let (clip_tx, clip_rx) = mpsc::channel::<AudioClip>();
    let (event_tx, event_rx) = mpsc::channel::<&'static str>();
    let start_tx = event_tx.clone();
    let end_tx = event_tx;

    recorder
        .start_auto(AutoCallbacks {
            on_speech_start: Box::new(move || {
                let _ = start_tx.send("start");
            }),
            on_speech_end: Box::new(move || {
                let _ = end_tx.send("end");
            }),
            on_clip_ready: Box::new(move |clip| {
                let _ = clip_tx.send(clip);
            }),
        })
        .unwrap();

    let first = clip_rx.recv_timeout(Duration::from_secs(2)).expect("first clip");
    let second = clip_rx.recv_timeout(Duration::from_secs(2)).expect("second clip");
    recorder.stop_auto();
    assert_eq!(recorder.phase(), RecorderPhase::Idle);

    for clip in [&first, &second] {
        assert!(
            (1.0..=1.4).contains(&clip.duration_s()),
            "duration {}",
            clip.duration_s()
        );
        assert_eq!(clip.sample_rate, RATE);
        assert!(clip.peak() < 2.0);
    }
    assert!(clip_rx.try_recv().is_err(), "exactly two clips expected");

    let boundary_events: Vec<&str> = event_rx.try_iter().collect();
    assert_eq!(boundary_events, vec!["start", "end", "start", "end"]);
}

#[test]
fn stop_auto_is_idempotent() {
    let backend = backend_with_script(silence_samples(0.5, RATE), AfterScript::Silence);
    let recorder = Recorder::new(backend, config(0));

    recorder
        .start_auto(AutoCallbacks {
            on_speech_start: Box::new(|| {}),
            on_speech_end: Box::new(|| {}),
            on_clip_ready: Box::new(|_| {}),
        })
        .unwrap();
    assert!(wait_for_phase(
        &recorder,
        RecorderPhase::AutoWaiting,
        Duration::from_secs(1)
    ));
    recorder.stop_auto();
    recorder.stop_auto();
    assert_eq!(recorder.phase(), RecorderPhase::Idle);
}
