// SPDX-License-Identifier: GPL-3.0-only

//! Audio backend abstraction and the cpal implementation.
//!
//! The core works against blocking reads of mono f32 frames. The cpal
//! adapter owns the callback-driven stream on a dedicated thread (cpal
//! streams are not `Send`) and bridges it to `read` through a bounded ring
//! buffer. Sample conversion to f32 happens once here: i16 / 32768,
//! i32 / 2147483648, f32 passthrough.

use crate::error::CoreError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Hardware sample formats tried during probing, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    F32,
    I16,
    I32,
}

impl SampleType {
    /// Probe preference order.
    pub const FALLBACK_ORDER: [Self; 3] = [Self::F32, Self::I16, Self::I32];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::I16 => "int16",
            Self::I32 => "int32",
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One enumerated input device. Valid for the lifetime of a single
/// enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
    pub host_api: String,
    pub channels: u16,
    pub default_sample_rate: u32,
}

/// Parameters for opening an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub device_index: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_type: SampleType,
}

/// Blocking-read input stream of mono f32 samples.
pub trait InputStream: Send {
    /// Read exactly `frames` mono frames, blocking until available.
    ///
    /// # Errors
    ///
    /// Returns `StreamFailed` when the underlying stream reported an error.
    fn read(&mut self, frames: usize) -> Result<Vec<f32>, CoreError>;
}

/// OS audio services consumed by the registry, level monitor, and recorder.
pub trait AudioBackend: Send + Sync {
    /// Enumerate devices reporting at least one input channel.
    ///
    /// # Errors
    ///
    /// Returns `DeviceEnumerationFailed` when the host cannot be queried.
    fn input_devices(&self) -> Result<Vec<DeviceDescriptor>, CoreError>;

    /// Open a blocking-read input stream.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpenFailed` when the device rejects the requested
    /// configuration.
    fn open_input(&self, spec: StreamSpec) -> Result<Box<dyn InputStream>, CoreError>;
}

// ---------------------------------------------------------------------------
// cpal implementation
// ---------------------------------------------------------------------------

// Reader stalls drop the oldest audio once the ring holds this much.
const RING_CAPACITY_SECONDS: usize = 32;

struct RingInner {
    samples: VecDeque<f32>,
    error: Option<String>,
}

struct Ring {
    inner: Mutex<RingInner>,
    cond: Condvar,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                samples: VecDeque::new(),
                error: None,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    fn push(&self, samples: &[f32]) {
        let mut inner = self.inner.lock();
        inner.samples.extend(samples);
        while inner.samples.len() > self.capacity {
            inner.samples.pop_front();
        }
        drop(inner);
        self.cond.notify_all();
    }

    fn set_error(&self, message: String) {
        self.inner.lock().error = Some(message);
        self.cond.notify_all();
    }

    fn read(&self, frames: usize) -> Result<Vec<f32>, CoreError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(ref message) = inner.error {
                return Err(CoreError::StreamFailed(message.clone()));
            }
            if inner.samples.len() >= frames {
                return Ok(inner.samples.drain(..frames).collect());
            }
            // Reads are device-driven and have no overall timeout; the wait
            // is bounded only so error flags are observed promptly.
            let _ = self.cond.wait_for(&mut inner, Duration::from_millis(250));
        }
    }
}

struct CpalInputStream {
    ring: Arc<Ring>,
    stop: Arc<AtomicBool>,
}

impl InputStream for CpalInputStream {
    fn read(&mut self, frames: usize) -> Result<Vec<f32>, CoreError> {
        self.ring.read(frames)
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Default backend over the system's cpal hosts.
#[derive(Default)]
pub struct CpalBackend;

impl CpalBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn devices_in_order() -> Result<Vec<(String, cpal::Device)>, CoreError> {
        let mut out = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    debug!("Host {} unavailable: {e}", host_id.name());
                    continue;
                }
            };
            let devices = host
                .input_devices()
                .map_err(|e| CoreError::DeviceEnumerationFailed(e.to_string()))?;
            for device in devices {
                out.push((host_id.name().to_string(), device));
            }
        }
        Ok(out)
    }
}

impl AudioBackend for CpalBackend {
    fn input_devices(&self) -> Result<Vec<DeviceDescriptor>, CoreError> {
        let mut descriptors = Vec::new();
        for (index, (host_api, device)) in Self::devices_in_order()?.into_iter().enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let config = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    debug!("Skipping device '{name}': no input config ({e})");
                    continue;
                }
            };
            if config.channels() == 0 {
                continue;
            }
            descriptors.push(DeviceDescriptor {
                index,
                name,
                host_api,
                channels: config.channels(),
                default_sample_rate: config.sample_rate().0,
            });
        }
        Ok(descriptors)
    }

    fn open_input(&self, spec: StreamSpec) -> Result<Box<dyn InputStream>, CoreError> {
        let device = Self::devices_in_order()?
            .into_iter()
            .nth(spec.device_index)
            .map(|(_, device)| device)
            .ok_or_else(|| CoreError::DeviceOpenFailed {
                index: spec.device_index,
                reason: "device index out of range".to_string(),
            })?;

        let ring = Arc::new(Ring::new(RING_CAPACITY_SECONDS * spec.sample_rate as usize));
        let stop = Arc::new(AtomicBool::new(false));

        // cpal streams are !Send, so the stream lives on its own thread and
        // the handle only carries the ring.
        let (setup_tx, setup_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);
        let ring_for_thread = Arc::clone(&ring);
        let stop_for_thread = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("voxkey-stream".to_string())
            .spawn(move || {
                match build_stream(&device, spec, &ring_for_thread) {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = setup_tx.send(Err(e.to_string()));
                            return;
                        }
                        let _ = setup_tx.send(Ok(()));
                        while !stop_for_thread.load(Ordering::Relaxed) {
                            std::thread::park_timeout(Duration::from_millis(50));
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = setup_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| CoreError::DeviceOpenFailed {
                index: spec.device_index,
                reason: format!("failed to spawn stream thread: {e}"),
            })?;

        match setup_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInputStream { ring, stop })),
            Ok(Err(reason)) => Err(CoreError::DeviceOpenFailed {
                index: spec.device_index,
                reason,
            }),
            Err(_) => Err(CoreError::DeviceOpenFailed {
                index: spec.device_index,
                reason: "stream thread exited during setup".to_string(),
            }),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn downmix(ring: &Ring, samples: &[f32], channels: usize) {
    if channels <= 1 {
        ring.push(samples);
        return;
    }
    let mono: Vec<f32> = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    ring.push(&mono);
}

#[allow(clippy::cast_precision_loss)]
fn build_stream(
    device: &cpal::Device,
    spec: StreamSpec,
    ring: &Arc<Ring>,
) -> Result<cpal::Stream, String> {
    let config = cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = usize::from(spec.channels);
    let err_ring = Arc::clone(ring);
    let err_fn = move |err: cpal::StreamError| {
        warn!("Input stream error: {err}");
        err_ring.set_error(err.to_string());
    };

    let stream = match spec.sample_type {
        SampleType::F32 => {
            let data_ring = Arc::clone(ring);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    downmix(&data_ring, data, channels);
                },
                err_fn,
                None,
            )
        }
        SampleType::I16 => {
            let data_ring = Arc::clone(ring);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<f32> =
                        data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    downmix(&data_ring, &converted, channels);
                },
                err_fn,
                None,
            )
        }
        SampleType::I32 => {
            let data_ring = Arc::clone(ring);
            device.build_input_stream(
                &config,
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<f32> =
                        data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                    downmix(&data_ring, &converted, channels);
                },
                err_fn,
                None,
            )
        }
    };

    stream.map_err(|e| e.to_string())
}
