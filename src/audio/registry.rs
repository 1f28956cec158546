// SPDX-License-Identifier: GPL-3.0-only

//! Input device enumeration, ranking, and format probing.
//!
//! Probing finds the first `(sample type, rate)` pair a device actually
//! produces valid audio with; results are cached for the process lifetime so
//! repeated probes of the same device are free and stable.

use crate::audio::backend::{AudioBackend, CpalBackend, DeviceDescriptor, SampleType, StreamSpec};
use crate::audio::level::LevelMonitor;
use crate::audio::processing::{is_valid_audio, peak};
use crate::error::CoreError;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
const PROBE_DURATION_S: f32 = 0.25;
const COMMON_RATES: [u32; 3] = [44_100, 48_000, 16_000];

const PREFERRED_KEYWORDS: [&str; 3] = ["microphone", "headset", "mic"];
const AVOID_KEYWORDS: [&str; 4] = ["sound mapper", "stereo mix", "virtual", "output"];
// Most to least preferred host API.
const PREFERRED_APIS: [&str; 4] = ["wasapi", "directsound", "mme", "wdm"];

/// The working capture format discovered for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub sample_type: SampleType,
    pub sample_rate: u32,
}

/// Process-wide registry of input devices and their probed formats.
pub struct DeviceRegistry {
    backend: Arc<dyn AudioBackend>,
    probe_cache: DashMap<usize, ProbeResult>,
    monitor: Mutex<Option<LevelMonitor>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(CpalBackend::new()))
    }
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            probe_cache: DashMap::new(),
            monitor: Mutex::new(None),
        }
    }

    /// Forget every cached probe result.
    pub fn clear_probe_cache(&self) {
        self.probe_cache.clear();
    }

    /// The backend this registry enumerates, for components opening their
    /// own streams against the same device indices.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn AudioBackend> {
        Arc::clone(&self.backend)
    }

    /// All devices reporting at least one input channel.
    ///
    /// # Errors
    ///
    /// Returns `DeviceEnumerationFailed` when the backend cannot enumerate.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CoreError> {
        self.backend.input_devices()
    }

    #[must_use]
    pub fn score(device: &DeviceDescriptor) -> i32 {
        let name = device.name.to_ascii_lowercase();
        let api = device.host_api.to_ascii_lowercase();
        let mut score = 0;

        if PREFERRED_KEYWORDS.iter().any(|kw| name.contains(kw)) {
            score += 10;
        }
        if AVOID_KEYWORDS.iter().any(|kw| name.contains(kw)) {
            score -= 20;
        }
        for (rank, api_kw) in PREFERRED_APIS.iter().rev().enumerate() {
            if api.contains(api_kw) {
                score += (i32::try_from(rank).unwrap_or(0) + 1) * 3;
                break;
            }
        }
        if device.channels == 1 || device.channels == 2 {
            score += 2;
        }
        score
    }

    /// Devices ranked best-first; ties keep enumeration order.
    ///
    /// # Errors
    ///
    /// Returns `DeviceEnumerationFailed` when the backend cannot enumerate.
    pub fn score_and_rank(&self) -> Result<Vec<DeviceDescriptor>, CoreError> {
        let mut devices = self.list_devices()?;
        devices.sort_by_key(|d| std::cmp::Reverse(Self::score(d)));
        Ok(devices)
    }

    /// Find a working `(sample type, rate)` for a device, caching the first
    /// success. Returns `None` when every combination fails.
    pub fn probe(&self, device_index: usize, requested_rate: Option<u32>) -> Option<ProbeResult> {
        if let Some(cached) = self.probe_cache.get(&device_index) {
            return Some(*cached);
        }

        let native_rate = self
            .list_devices()
            .ok()
            .and_then(|devices| devices.into_iter().find(|d| d.index == device_index))
            .map(|d| d.default_sample_rate);

        let mut rates: Vec<u32> = Vec::new();
        for rate in requested_rate
            .into_iter()
            .chain([DEFAULT_SAMPLE_RATE])
            .chain(native_rate)
            .chain(COMMON_RATES)
        {
            if rate > 0 && !rates.contains(&rate) {
                rates.push(rate);
            }
        }

        for rate in rates {
            for sample_type in SampleType::FALLBACK_ORDER {
                match self.capture_test_buffer(device_index, rate, sample_type, PROBE_DURATION_S) {
                    Ok(samples) if is_valid_audio(&samples) => {
                        info!(
                            "Device {device_index} works with {sample_type} @ {rate}Hz"
                        );
                        let result = ProbeResult {
                            sample_type,
                            sample_rate: rate,
                        };
                        self.probe_cache.insert(device_index, result);
                        return Some(result);
                    }
                    Ok(_) => {
                        debug!(
                            "Device {device_index} {sample_type} @ {rate}Hz returned invalid data"
                        );
                    }
                    Err(e) => {
                        debug!("Device {device_index} {sample_type} @ {rate}Hz failed: {e}");
                    }
                }
            }
        }
        None
    }

    /// The probed format for a device, defaulting to f32 @ 16 kHz.
    #[must_use]
    pub fn working_format(&self, device_index: usize) -> ProbeResult {
        self.probe_cache
            .get(&device_index)
            .map(|r| *r)
            .unwrap_or(ProbeResult {
                sample_type: SampleType::F32,
                sample_rate: DEFAULT_SAMPLE_RATE,
            })
    }

    /// Pick the best device by score alone, without probing.
    ///
    /// # Errors
    ///
    /// Returns `DeviceEnumerationFailed` when the backend cannot enumerate.
    pub fn default_device(&self) -> Result<Option<DeviceDescriptor>, CoreError> {
        Ok(self.score_and_rank()?.into_iter().next())
    }

    /// Probe ranked candidates and return the first that produces valid
    /// audio, falling back to the heuristic default when none do.
    ///
    /// # Errors
    ///
    /// Returns `DeviceEnumerationFailed` when the backend cannot enumerate.
    pub fn best_working_device(&self) -> Result<Option<DeviceDescriptor>, CoreError> {
        let ranked = self.score_and_rank()?;
        for device in &ranked {
            if self.probe(device.index, None).is_some() {
                info!(
                    "Best working device: [{}] {} (api={})",
                    device.index, device.name, device.host_api
                );
                return Ok(Some(device.clone()));
            }
        }
        warn!("No working input device found during probing, falling back to heuristic");
        Ok(ranked.into_iter().next())
    }

    /// Record briefly and return peak amplitude in [0, 1]. Returns 0.0 when
    /// the device produces no usable audio.
    #[must_use]
    pub fn test_device(&self, device_index: usize, duration_s: f32) -> f32 {
        let format = self.working_format(device_index);
        match self.capture_test_buffer(
            device_index,
            format.sample_rate,
            format.sample_type,
            duration_s,
        ) {
            Ok(samples) if is_valid_audio(&samples) => return peak(&samples).min(1.0),
            Ok(_) => debug!("Device {device_index} test returned garbage, reprobing"),
            Err(e) => {
                error!("Device test failed: {e}");
                return 0.0;
            }
        }

        // The default format returned garbage; probe for a working one and
        // retry once.
        if let Some(probed) = self.probe(device_index, None) {
            if probed != format {
                if let Ok(samples) = self.capture_test_buffer(
                    device_index,
                    probed.sample_rate,
                    probed.sample_type,
                    duration_s,
                ) {
                    if is_valid_audio(&samples) {
                        return peak(&samples).min(1.0);
                    }
                }
            }
        }
        0.0
    }

    /// Start the background RMS monitor for a device, replacing any monitor
    /// already running.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpenFailed` when the monitor stream cannot be opened.
    pub fn start_level_monitor(
        &self,
        device_index: usize,
        callback: Box<dyn Fn(f32) + Send>,
        interval_s: f32,
    ) -> Result<(), CoreError> {
        self.stop_level_monitor();

        let format = self.working_format(device_index);
        let stream = self.backend.open_input(StreamSpec {
            device_index,
            sample_rate: format.sample_rate,
            channels: 1,
            sample_type: format.sample_type,
        })?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let chunk_frames = ((format.sample_rate as f32 * interval_s).ceil() as usize).max(800);
        let monitor = LevelMonitor::start(stream, chunk_frames, callback);
        *self.monitor.lock() = Some(monitor);
        Ok(())
    }

    /// Stop the level monitor if one is running. Idempotent.
    pub fn stop_level_monitor(&self) {
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
    }

    fn capture_test_buffer(
        &self,
        device_index: usize,
        sample_rate: u32,
        sample_type: SampleType,
        duration_s: f32,
    ) -> Result<Vec<f32>, CoreError> {
        let mut stream = self.backend.open_input(StreamSpec {
            device_index,
            sample_rate,
            channels: 1,
            sample_type,
        })?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = (sample_rate as f32 * duration_s) as usize;
        stream.read(frames)
    }
}
