// SPDX-License-Identifier: GPL-3.0-only

/// A finished mono recording, always float32 in [-1.0, 1.0].
///
/// Clips are produced by the recorder and consumed whole by the transcriber;
/// the recorder guarantees duration bounds and finiteness before emitting.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration_s(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.samples.iter().map(|&x| x * x).sum::<f32>() / self.samples.len() as f32).sqrt()
    }

    #[must_use]
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|&x| x.abs()).fold(0.0f32, f32::max)
    }
}
