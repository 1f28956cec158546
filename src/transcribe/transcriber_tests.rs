// SPDX-License-Identifier: GPL-3.0-only
use crate::models::{AudioClip, ComputeKind, DeviceKind, StopReason, WhisperModelId};
use crate::transcribe::transcriber::{
    MAX_SEGMENTS, Observers, PASS_B_MIN_RMS, Transcriber, TranscriberConfig, total_budget_s,
};
use crate::transcribe::CancelSignal;
use crate::testutil::{FakeEngine, FakeModelScript, seg};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn clip_of(amplitude: f32, duration_s: f32) -> AudioClip {
    AudioClip::new(vec![amplitude; (duration_s * 16_000.0) as usize], 16_000)
}

fn transcriber_with(script: FakeModelScript) -> Transcriber {
    Transcriber::with_engine(
        TranscriberConfig::default(),
        Box::new(FakeEngine::new(false, script)),
    )
}

struct DebugLog {
    events: Arc<Mutex<Vec<serde_json::Value>>>,
    statuses: Arc<Mutex<Vec<String>>>,
}

impl DebugLog {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            statuses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.get("event").and_then(|v| v.as_str()).map(String::from))
            .collect()
    }
}

#[test]
fn happy_path_joins_segments_in_order() {
    let script = FakeModelScript {
        vad_on_segments: vec![seg("hello", 0.0, 1.0), seg("world", 1.0, 2.0)],
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);
    let result = transcriber
        .transcribe(&clip_of(0.1, 2.0), &CancelSignal::new(), &Observers::none())
        .unwrap();

    assert_eq!(result.text, "hello world");
    assert_eq!(result.language, "en");
    assert_eq!(result.model_name, "base.en");
    assert_eq!(result.segments.len(), 2);
    assert!(result.segments.windows(2).all(|w| w[0].start_s <= w[1].start_s));
    assert_eq!(result.debug_info.selected_pass, "vad_on");
    assert_eq!(result.debug_info.passes.len(), 1);
    assert_eq!(result.debug_info.passes[0].stop_reason, StopReason::Eof);
    assert!(result.words_per_minute() > 0.0);
}

#[test]
fn silent_clip_yields_empty_result_without_retry() {
    // VAD pass finds nothing, and RMS 0 is below the retry gate.
    let mut transcriber = transcriber_with(FakeModelScript {
        vad_off_segments: vec![seg("ghost", 0.0, 1.0)],
        ..FakeModelScript::default()
    });
    let result = transcriber
        .transcribe(&clip_of(0.0, 1.0), &CancelSignal::new(), &Observers::none())
        .unwrap();

    assert_eq!(result.text, "");
    assert!(result.segments.is_empty());
    assert_eq!(result.debug_info.passes.len(), 1);
    assert_eq!(result.debug_info.selected_pass, "vad_on");
    assert!(matches!(
        result.debug_info.passes[0].stop_reason,
        StopReason::Eof | StopReason::SegmentCap
    ));
    assert_eq!(result.words_per_minute(), 0.0);
}

#[test]
fn vad_false_negative_falls_back_to_second_pass() {
    // Scenario: low-energy but audible speech the VAD pass drops entirely.
    let script = FakeModelScript {
        vad_off_segments: vec![seg("hello there", 0.0, 3.0)],
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);
    let result = transcriber
        .transcribe(&clip_of(0.01, 3.0), &CancelSignal::new(), &Observers::none())
        .unwrap();

    assert_eq!(result.debug_info.passes.len(), 2);
    assert_eq!(result.debug_info.passes[0].name, "vad_on");
    assert_eq!(result.debug_info.passes[1].name, "vad_off");
    assert_eq!(result.debug_info.selected_pass, "vad_off");
    assert_eq!(result.text, "hello there");
}

#[test]
fn retry_is_skipped_below_rms_gate() {
    let script = FakeModelScript {
        vad_off_segments: vec![seg("noise floor", 0.0, 1.0)],
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);
    let quiet = clip_of(PASS_B_MIN_RMS / 2.0, 1.0);
    let result = transcriber
        .transcribe(&quiet, &CancelSignal::new(), &Observers::none())
        .unwrap();

    assert_eq!(result.debug_info.passes.len(), 1);
    assert_eq!(result.text, "");
}

#[test]
fn cancel_before_start_returns_empty_without_loading() {
    let engine = FakeEngine::new(false, FakeModelScript::default());
    let loads = Arc::clone(&engine.loads);
    let mut transcriber = Transcriber::with_engine(TranscriberConfig::default(), Box::new(engine));

    let cancel = CancelSignal::new();
    cancel.set();
    let result = transcriber
        .transcribe(&clip_of(0.1, 2.0), &cancel, &Observers::none())
        .unwrap();

    assert_eq!(result.text, "");
    assert!(result.segments.is_empty());
    assert!(result.debug_info.passes.is_empty());
    assert!(loads.lock().is_empty(), "model must not be loaded");
}

#[test]
fn cancel_mid_pass_stops_at_segment_boundary() {
    let script = FakeModelScript {
        vad_on_segments: (0..100).map(|i| seg("word", i as f32, i as f32 + 1.0)).collect(),
        delay_per_segment: Duration::from_millis(30),
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);

    let cancel = CancelSignal::new();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            cancel.set();
        })
    };
    let result = transcriber
        .transcribe(&clip_of(0.1, 15.0), &cancel, &Observers::none())
        .unwrap();
    canceller.join().unwrap();

    assert_eq!(result.text, "");
    assert!(result.segments.is_empty());
    assert_eq!(result.debug_info.passes[0].stop_reason, StopReason::Cancelled);
    // Cancellation also vetoes the retry pass.
    assert_eq!(result.debug_info.passes.len(), 1);
}

#[test]
fn segment_cap_stops_the_stream() {
    let script = FakeModelScript {
        vad_on_segments: (0..80).map(|i| seg("w", i as f32, i as f32 + 1.0)).collect(),
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);
    let result = transcriber
        .transcribe(&clip_of(0.1, 2.0), &CancelSignal::new(), &Observers::none())
        .unwrap();

    assert_eq!(result.segments.len(), MAX_SEGMENTS);
    assert_eq!(result.debug_info.passes[0].stop_reason, StopReason::SegmentCap);
}

#[test]
fn engine_deadline_before_first_segment_is_a_pass_timeout() {
    let script = FakeModelScript {
        deadline_exceeded: true,
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);
    let result = transcriber
        .transcribe(&clip_of(0.0, 2.0), &CancelSignal::new(), &Observers::none())
        .unwrap();

    assert_eq!(result.text, "");
    assert_eq!(result.debug_info.passes[0].stop_reason, StopReason::PassTimeout);
    // Duration falls back to the clip length when the engine reported nothing.
    assert!((result.audio_duration_s - 2.0).abs() < 0.01);
}

#[test]
fn decode_errors_propagate() {
    let script = FakeModelScript {
        fail_decode: Some("tensor shape mismatch".to_string()),
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);
    let err = transcriber
        .transcribe(&clip_of(0.1, 2.0), &CancelSignal::new(), &Observers::none())
        .unwrap_err();
    assert!(err.to_string().contains("tensor shape mismatch"));
}

#[test]
fn auto_resolution_without_gpu_uses_cpu_int8() {
    let engine = FakeEngine::new(false, FakeModelScript::default());
    let loads = Arc::clone(&engine.loads);
    let mut transcriber = Transcriber::with_engine(TranscriberConfig::default(), Box::new(engine));
    transcriber.load_model().unwrap();

    assert_eq!(
        transcriber.resolved_device(),
        Some((DeviceKind::Cpu, ComputeKind::Int8))
    );
    assert_eq!(
        loads.lock().as_slice(),
        &[(WhisperModelId::BaseEn, DeviceKind::Cpu, ComputeKind::Int8)]
    );
}

#[test]
fn auto_resolution_with_gpu_uses_float16() {
    let engine = FakeEngine::new(true, FakeModelScript::default());
    let mut transcriber = Transcriber::with_engine(TranscriberConfig::default(), Box::new(engine));
    transcriber.load_model().unwrap();
    assert_eq!(
        transcriber.resolved_device(),
        Some((DeviceKind::Cuda, ComputeKind::Float16))
    );
}

#[test]
fn explicit_device_and_compute_are_used_as_is() {
    let engine = FakeEngine::new(true, FakeModelScript::default());
    let loads = Arc::clone(&engine.loads);
    let config = TranscriberConfig {
        device: DeviceKind::Cpu,
        compute: ComputeKind::Float16,
        model: WhisperModelId::TinyEn,
        ..TranscriberConfig::default()
    };
    let mut transcriber = Transcriber::with_engine(config, Box::new(engine));
    transcriber.load_model().unwrap();
    assert_eq!(
        loads.lock().as_slice(),
        &[(WhisperModelId::TinyEn, DeviceKind::Cpu, ComputeKind::Float16)]
    );
}

#[test]
fn cuda_load_failure_falls_back_to_cpu_once() {
    let engine = FakeEngine::new(true, FakeModelScript::default());
    engine.fail_next_load("CUBLAS_STATUS_NOT_INITIALIZED during handle creation");
    let loads = Arc::clone(&engine.loads);
    let mut transcriber = Transcriber::with_engine(TranscriberConfig::default(), Box::new(engine));
    transcriber.load_model().unwrap();

    assert_eq!(
        loads.lock().as_slice(),
        &[
            (WhisperModelId::BaseEn, DeviceKind::Cuda, ComputeKind::Float16),
            (WhisperModelId::BaseEn, DeviceKind::Cpu, ComputeKind::Int8),
        ]
    );
    assert_eq!(
        transcriber.resolved_device(),
        Some((DeviceKind::Cpu, ComputeKind::Int8))
    );
}

#[test]
fn non_cuda_load_failure_propagates() {
    let engine = FakeEngine::new(true, FakeModelScript::default());
    engine.fail_next_load("weights file corrupted");
    let mut transcriber = Transcriber::with_engine(TranscriberConfig::default(), Box::new(engine));
    let err = transcriber.load_model().unwrap_err();
    assert!(err.to_string().contains("weights file corrupted"));
    assert!(!transcriber.is_loaded());
}

#[test]
fn model_load_is_lazy_and_idempotent() {
    let engine = FakeEngine::new(false, FakeModelScript::default());
    let loads = Arc::clone(&engine.loads);
    let mut transcriber = Transcriber::with_engine(TranscriberConfig::default(), Box::new(engine));
    assert!(!transcriber.is_loaded());

    let cancel = CancelSignal::new();
    transcriber
        .transcribe(&clip_of(0.1, 1.0), &cancel, &Observers::none())
        .unwrap();
    transcriber
        .transcribe(&clip_of(0.1, 1.0), &cancel, &Observers::none())
        .unwrap();
    assert_eq!(loads.lock().len(), 1);

    transcriber.unload();
    assert!(!transcriber.is_loaded());
}

#[test]
fn status_and_debug_events_fire_in_order() {
    let script = FakeModelScript {
        vad_on_segments: vec![seg("hi", 0.0, 1.0)],
        ..FakeModelScript::default()
    };
    let mut transcriber = transcriber_with(script);

    let log = DebugLog::new();
    let statuses = Arc::clone(&log.statuses);
    let events = Arc::clone(&log.events);
    let on_status = move |message: &str| statuses.lock().push(message.to_string());
    let on_debug = move |event: serde_json::Value| events.lock().push(event);
    let observers = Observers {
        on_status: Some(&on_status),
        on_debug: Some(&on_debug),
    };

    transcriber
        .transcribe(&clip_of(0.1, 1.0), &CancelSignal::new(), &observers)
        .unwrap();

    assert_eq!(
        log.statuses.lock().as_slice(),
        &["Loading model…".to_string(), "Transcribing…".to_string()]
    );
    assert_eq!(
        log.event_names(),
        vec![
            "audio",
            "timeout_budget",
            "pass_start",
            "engine_call_start",
            "engine_call_end",
            "pass_end",
        ]
    );
}

#[test]
fn budget_formula_is_clamped() {
    assert_eq!(total_budget_s(0.0), 60.0);
    assert_eq!(total_budget_s(1.0), 60.0);
    assert_eq!(total_budget_s(10.0), 105.0);
    assert_eq!(total_budget_s(30.0), 240.0);
    assert_eq!(total_budget_s(1_000.0), 240.0);
}
