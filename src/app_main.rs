// SPDX-License-Identifier: GPL-3.0-only

//! Binary entry point: argument dispatch and the event-printing run loops.

use crate::audio::backend::StreamSpec;
use crate::audio::processing::{ResampleQuality, read_wav_mono, resample, write_wav_mono};
use crate::audio::registry::DeviceRegistry;
use crate::cli;
use crate::controller::{CoreServices, PipelineController};
use crate::events::CoreEvent;
use crate::models::{AudioClip, DeviceKind, WhisperModelId};
use crate::settings::Settings;
use crate::transcribe::{CancelSignal, Observers, Transcriber, TranscriberConfig};
use anyhow::{Context, Result};
use clap::parser::ValueSource;
use log::{info, warn};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Main entry point for the voxkey binary.
///
/// # Errors
///
/// Returns an error when a subcommand fails fatally (bad device, bad file,
/// model load failure).
pub async fn run() -> Result<()> {
    let matches = cli::build().get_matches();

    let verbose = matches.get_flag("verbose");
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let mut settings = Settings::load();
    if matches.value_source("model") == Some(ValueSource::CommandLine) {
        if let Some(model) = matches.get_one::<WhisperModelId>("model") {
            settings.model = *model;
        }
    }
    let device = matches
        .get_one::<DeviceKind>("device")
        .copied()
        .unwrap_or(DeviceKind::Auto);

    if let Some(_sub) = matches.subcommand_matches("devices") {
        return handle_devices();
    }
    if let Some(sub) = matches.subcommand_matches("test-device") {
        let index = *sub.get_one::<usize>("index").context("missing device index")?;
        let duration = *sub.get_one::<f32>("duration").context("missing duration")?;
        return handle_test_device(index, duration);
    }
    if let Some(sub) = matches.subcommand_matches("record") {
        let file = sub
            .get_one::<PathBuf>("file")
            .context("missing file argument")?
            .clone();
        let duration = *sub.get_one::<f32>("duration").context("missing duration")?;
        return handle_record(&file, duration);
    }
    if let Some(sub) = matches.subcommand_matches("transcribe") {
        let file = sub
            .get_one::<PathBuf>("file")
            .context("missing file argument")?
            .clone();
        return handle_transcribe(&file, &settings, device).await;
    }
    if matches.subcommand_matches("listen").is_some() {
        return run_pipeline(settings, device, true).await;
    }

    run_pipeline(settings, device, false).await
}

fn handle_devices() -> Result<()> {
    let registry = DeviceRegistry::default();
    let ranked = registry.score_and_rank()?;
    if ranked.is_empty() {
        println!("No input devices found.");
        return Ok(());
    }
    for device in ranked {
        let score = DeviceRegistry::score(&device);
        match registry.probe(device.index, None) {
            Some(probe) => println!(
                "[{}] {} ({}, {}ch, score {score}) -> {} @ {}Hz",
                device.index,
                device.name,
                device.host_api,
                device.channels,
                probe.sample_type,
                probe.sample_rate
            ),
            None => println!(
                "[{}] {} ({}, {}ch, score {score}) -> no working format",
                device.index, device.name, device.host_api, device.channels
            ),
        }
    }
    Ok(())
}

fn handle_test_device(index: usize, duration: f32) -> Result<()> {
    let registry = DeviceRegistry::default();
    let peak = registry.test_device(index, duration);
    println!("Device {index} peak level: {peak:.3}");
    if peak == 0.0 {
        println!("No usable audio captured. Is the microphone muted?");
    }
    Ok(())
}

fn handle_record(file: &std::path::Path, duration: f32) -> Result<()> {
    let registry = DeviceRegistry::default();
    let device = registry
        .best_working_device()?
        .context("no input devices found")?;
    let format = registry.working_format(device.index);
    info!(
        "Recording {duration:.1}s from [{}] {} ({} @ {}Hz)…",
        device.index, device.name, format.sample_type, format.sample_rate
    );

    let mut stream = registry.backend().open_input(StreamSpec {
        device_index: device.index,
        sample_rate: format.sample_rate,
        channels: 1,
        sample_type: format.sample_type,
    })?;
    let frames = (duration * format.sample_rate as f32) as usize;
    let samples = stream.read(frames)?;
    write_wav_mono(file, &samples, format.sample_rate)?;

    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    println!(
        "Wrote {} ({:.1}s at {}Hz, peak {peak:.3})",
        file.display(),
        duration,
        format.sample_rate
    );
    Ok(())
}

async fn handle_transcribe(file: &std::path::Path, settings: &Settings, device: DeviceKind) -> Result<()> {
    let (samples, sample_rate) = read_wav_mono(file)?;
    let samples = if sample_rate == 16_000 {
        samples
    } else {
        resample(&samples, sample_rate, 16_000, ResampleQuality::HighQuality)?
    };
    let clip = AudioClip::new(samples, 16_000);
    info!(
        "Transcribing {} ({:.2}s of audio)",
        file.display(),
        clip.duration_s()
    );

    let config = TranscriberConfig {
        model: settings.model,
        language: settings.language.clone(),
        device,
        ..TranscriberConfig::default()
    };
    let result = tokio::task::spawn_blocking(move || {
        let mut transcriber = Transcriber::new(config);
        transcriber.transcribe(&clip, &CancelSignal::new(), &Observers::none())
    })
    .await
    .context("transcription task failed")??;

    if result.text.is_empty() {
        println!("(no speech detected)");
    } else {
        println!("{}", result.text);
    }
    info!(
        "{} segments in {:.0}ms, {:.0} wpm",
        result.segments.len(),
        result.processing_time_ms,
        result.words_per_minute()
    );
    Ok(())
}

async fn run_pipeline(settings: Settings, device: DeviceKind, auto_listen: bool) -> Result<()> {
    let transcriber_config = TranscriberConfig {
        model: settings.model,
        language: settings.language.clone(),
        device,
        ..TranscriberConfig::default()
    };
    let controller =
        PipelineController::with_services(settings, CoreServices::native(transcriber_config))?;
    let mut events = controller.subscribe();

    if auto_listen {
        controller.start_listening()?;
        info!("Listening… speak, pause, and the transcript appears. Ctrl-C to quit.");
    } else {
        if let Err(e) = controller.bind_hotkeys() {
            warn!("Continuing without global hotkeys: {e}");
        }
        info!(
            "Ready ({} mode). Ctrl-C to quit.",
            controller.settings().recording_mode
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(CoreEvent::TranscriptionDone(result)) => {
                    if result.text.is_empty() {
                        println!("(no speech detected)");
                    } else {
                        println!("{}", result.text);
                        info!(
                            "{:.1}s audio, {:.0}ms processing, {:.0} wpm",
                            result.audio_duration_s,
                            result.processing_time_ms,
                            result.words_per_minute()
                        );
                    }
                }
                Ok(CoreEvent::RecordingStarted) => info!("Recording started"),
                Ok(CoreEvent::RecordingStopped) => info!("Recording stopped"),
                Ok(CoreEvent::Status(message)) => info!("{message}"),
                Ok(CoreEvent::Debug(event)) => log::debug!("debug event: {event}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event consumer lagged; {skipped} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    if auto_listen {
        controller.stop_listening();
    }
    controller.shutdown();
    info!("Goodbye");
    Ok(())
}
