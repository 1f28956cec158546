// SPDX-License-Identifier: GPL-3.0-only
pub mod backend;
pub mod level;
pub mod processing;
pub mod recorder;
#[cfg(test)]
mod recorder_tests;
pub mod registry;
#[cfg(test)]
mod registry_tests;
pub mod state;

pub use backend::{AudioBackend, CpalBackend, DeviceDescriptor, InputStream, SampleType, StreamSpec};
pub use recorder::{AutoCallbacks, Recorder, RecorderConfig};
pub use registry::{DeviceRegistry, ProbeResult};
pub use state::{MAX_DURATION_S, MIN_DURATION_S, RecorderPhase};
