// SPDX-License-Identifier: GPL-3.0-only
use crate::audio::backend::SampleType;
use crate::audio::registry::DeviceRegistry;
use crate::testutil::{AfterScript, Behavior, ScriptedBackend, speech_samples};
use std::sync::Arc;

fn noise_behavior() -> Behavior {
    Behavior::Valid {
        samples: speech_samples(2.0, 48_000),
        after: AfterScript::Silence,
    }
}

#[test]
fn ranking_prefers_real_microphones_over_mappers() {
    let mic = ScriptedBackend::device(0, "USB Microphone", "WASAPI", 1, 48_000);
    let mapper = ScriptedBackend::device(1, "Sound Mapper - Input", "MME", 2, 44_100);
    assert!(DeviceRegistry::score(&mic) > DeviceRegistry::score(&mapper));

    // +10 mic keyword, +12 wasapi, +2 channels
    assert_eq!(DeviceRegistry::score(&mic), 24);
    // -20 avoid keyword, +6 mme, +2 channels
    assert_eq!(DeviceRegistry::score(&mapper), -12);
}

#[test]
fn ranking_is_stable_for_ties() {
    let a = ScriptedBackend::device(0, "Input A", "ALSA", 4, 48_000);
    let b = ScriptedBackend::device(1, "Input B", "ALSA", 4, 48_000);
    let backend = Arc::new(ScriptedBackend::new(vec![a.clone(), b.clone()]));
    let registry = DeviceRegistry::new(backend);
    let ranked = registry.score_and_rank().unwrap();
    assert_eq!(ranked, vec![a, b]);
}

#[test]
fn host_api_preference_order() {
    let score_for = |api: &str| {
        DeviceRegistry::score(&ScriptedBackend::device(0, "Input", api, 1, 48_000))
    };
    assert!(score_for("Windows WASAPI") > score_for("Windows DirectSound"));
    assert!(score_for("Windows DirectSound") > score_for("MME"));
    assert!(score_for("MME") > score_for("Windows WDM-KS"));
    assert!(score_for("Windows WDM-KS") > score_for("JACK"));
}

#[test]
fn probe_falls_back_to_working_format() {
    // Scenario: float32 yields garbage everywhere, int16 works at 48 kHz.
    let device = ScriptedBackend::device(0, "Flaky Mic", "MME", 1, 48_000);
    let backend = Arc::new(ScriptedBackend::new(vec![device]));
    backend.script_all_rates(0, SampleType::F32, &Behavior::Garbage);
    backend.script(
        0,
        SampleType::I16,
        16_000,
        Behavior::OpenFail("format unsupported".to_string()),
    );
    backend.script(
        0,
        SampleType::I16,
        48_000,
        Behavior::Valid {
            samples: speech_samples(1.0, 48_000),
            after: AfterScript::Silence,
        },
    );
    let registry = DeviceRegistry::new(backend);

    let probe = registry.probe(0, Some(16_000)).expect("working format");
    assert_eq!(probe.sample_type, SampleType::I16);
    assert_eq!(probe.sample_rate, 48_000);
}

#[test]
fn probe_is_cached_and_idempotent() {
    let device = ScriptedBackend::device(0, "Mic", "ALSA", 1, 16_000);
    let backend = Arc::new(ScriptedBackend::new(vec![device]));
    backend.script(0, SampleType::F32, 16_000, noise_behavior());
    let registry = DeviceRegistry::new(Arc::clone(&backend) as Arc<dyn crate::audio::backend::AudioBackend>);

    let first = registry.probe(0, None).unwrap();
    let opens_after_first = backend.open_count();
    for _ in 0..3 {
        assert_eq!(registry.probe(0, None).unwrap(), first);
    }
    assert_eq!(backend.open_count(), opens_after_first);

    registry.clear_probe_cache();
    assert_eq!(registry.probe(0, None).unwrap(), first);
    assert!(backend.open_count() > opens_after_first);
}

#[test]
fn probe_returns_none_when_everything_fails() {
    let device = ScriptedBackend::device(0, "Dead Mic", "ALSA", 1, 16_000);
    let backend = Arc::new(ScriptedBackend::new(vec![device]));
    let registry = DeviceRegistry::new(backend);
    assert!(registry.probe(0, None).is_none());
}

#[test]
fn best_working_device_skips_broken_candidates() {
    // The mapper outranks nothing; the mic outranks the webcam but is broken,
    // so probing moves on to the webcam.
    let mic = ScriptedBackend::device(0, "Broken Microphone", "WASAPI", 1, 16_000);
    let webcam = ScriptedBackend::device(1, "Webcam Audio", "WASAPI", 2, 48_000);
    let backend = Arc::new(ScriptedBackend::new(vec![mic, webcam.clone()]));
    backend.script(1, SampleType::F32, 16_000, noise_behavior());
    let registry = DeviceRegistry::new(backend);

    let best = registry.best_working_device().unwrap().expect("device");
    assert_eq!(best, webcam);
}

#[test]
fn best_working_device_falls_back_to_heuristic_default() {
    let mic = ScriptedBackend::device(0, "Microphone", "WASAPI", 1, 16_000);
    let backend = Arc::new(ScriptedBackend::new(vec![mic.clone()]));
    let registry = DeviceRegistry::new(backend);
    // Probing fails everywhere, but the heuristic default is still returned.
    assert_eq!(registry.best_working_device().unwrap(), Some(mic));
}

#[test]
fn test_device_reports_peak_and_handles_garbage() {
    let device = ScriptedBackend::device(0, "Mic", "ALSA", 1, 16_000);
    let backend = Arc::new(ScriptedBackend::new(vec![device]));
    backend.script(
        0,
        SampleType::F32,
        16_000,
        Behavior::Valid {
            samples: vec![0.25; 16_000],
            after: AfterScript::Silence,
        },
    );
    let registry = DeviceRegistry::new(backend);

    let peak = registry.test_device(0, 0.5);
    assert!((peak - 0.25).abs() < 1e-3, "peak {peak}");

    let dead = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::device(
        0, "Mic", "ALSA", 1, 16_000,
    )]));
    let dead_registry = DeviceRegistry::new(dead);
    assert_eq!(dead_registry.test_device(0, 0.5), 0.0);
}

#[test]
fn level_monitor_reports_rms_and_stops() {
    let device = ScriptedBackend::device(0, "Mic", "ALSA", 1, 16_000);
    let backend = Arc::new(ScriptedBackend::new(vec![device]));
    backend.script(
        0,
        SampleType::F32,
        16_000,
        Behavior::Valid {
            samples: vec![0.5; 32_000],
            after: AfterScript::Silence,
        },
    );
    let registry = DeviceRegistry::new(backend);
    registry.probe(0, None).unwrap();

    let (tx, rx) = std::sync::mpsc::channel::<f32>();
    registry
        .start_level_monitor(
            0,
            Box::new(move |rms| {
                let _ = tx.send(rms);
            }),
            0.05,
        )
        .unwrap();

    let first = rx
        .recv_timeout(std::time::Duration::from_secs(2))
        .expect("level update");
    assert!((first - 0.5).abs() < 1e-3, "rms {first}");
    registry.stop_level_monitor();
    registry.stop_level_monitor();
}
