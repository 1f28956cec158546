// SPDX-License-Identifier: GPL-3.0-only

//! Log-mel spectrogram front end for the Whisper encoder.
//!
//! Matches the reference feature extractor: Hann window (periodic), STFT
//! with center reflection padding, Slaney-normalized mel filter bank,
//! log10 with (max - 8) clipping and the (x + 4) / 4 affine.

use anyhow::Result;
use candle_core::{Device, Tensor};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f32::consts::PI;

pub const SAMPLE_RATE: u32 = 16_000;
pub const N_FFT: usize = 400;
pub const HOP_LENGTH: usize = 160;
/// Encoder window: 30 s of audio = 3000 mel frames.
pub const CHUNK_FRAMES: usize = 3000;

// Slaney mel scale: linear below 1 kHz, logarithmic above.
fn hz_to_mel(hz: f32) -> f32 {
    const MIN_LOG_HZ: f32 = 1_000.0;
    const MIN_LOG_MEL: f32 = 15.0;
    let linear = hz / (200.0 / 3.0);
    if hz < MIN_LOG_HZ {
        linear
    } else {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / (6.4f32.ln() / 27.0)
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const MIN_LOG_MEL: f32 = 15.0;
    if mel < MIN_LOG_MEL {
        mel * (200.0 / 3.0)
    } else {
        1_000.0 * ((mel - MIN_LOG_MEL) * (6.4f32.ln() / 27.0)).exp()
    }
}

/// Triangular mel filter bank, `[n_mels, n_freqs]` row-major, Slaney area
/// normalization.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mel_filter_bank(n_mels: usize, n_freqs: usize) -> Vec<f32> {
    let sample_rate = SAMPLE_RATE as f32;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate / 2.0);

    let band_edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_freqs: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * sample_rate / (2.0 * (n_freqs - 1) as f32))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel_idx in 0..n_mels {
        let (lower, center, upper) = (
            band_edges[mel_idx],
            band_edges[mel_idx + 1],
            band_edges[mel_idx + 2],
        );
        let norm = 2.0 / (upper - lower);
        for (freq_idx, &freq) in bin_freqs.iter().enumerate() {
            let weight = if freq <= lower || freq >= upper {
                0.0
            } else if freq <= center {
                (freq - lower) / (center - lower)
            } else {
                (upper - freq) / (upper - center)
            };
            filters[mel_idx * n_freqs + freq_idx] = weight * norm;
        }
    }
    filters
}

// Periodic Hann window, matching torch.hann_window(n_fft).
#[allow(clippy::cast_precision_loss)]
fn hann_window(n_fft: usize) -> Vec<f32> {
    (0..n_fft)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n_fft as f32).cos()))
        .collect()
}

// Reflection padding of n_fft/2 on both sides (librosa center=True).
fn reflect_pad(audio: &[f32], n_fft: usize) -> Vec<f32> {
    let pad = n_fft / 2;
    let mut padded = Vec::with_capacity(audio.len() + 2 * pad);
    for i in 0..pad {
        let idx = pad - i;
        padded.push(audio.get(idx).copied().unwrap_or(0.0));
    }
    padded.extend_from_slice(audio);
    for i in 0..pad {
        let idx = audio.len().saturating_sub(2 + i);
        padded.push(audio.get(idx).copied().unwrap_or(0.0));
    }
    padded
}

fn stft_power(padded: &[f32], window: &[f32]) -> (Vec<f32>, usize) {
    let n_freqs = N_FFT / 2 + 1;
    let original_len = padded.len() - N_FFT;
    let n_frames = 1 + original_len / HOP_LENGTH;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(N_FFT);

    let mut power = Vec::with_capacity(n_frames * n_freqs);
    let mut frame_buf: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); N_FFT];
    for frame_idx in 0..n_frames {
        let start = frame_idx * HOP_LENGTH;
        for i in 0..N_FFT {
            let sample = padded.get(start + i).copied().unwrap_or(0.0);
            frame_buf[i] = Complex::new(sample * window[i], 0.0);
        }
        fft.process(&mut frame_buf);
        for c in frame_buf.iter().take(n_freqs) {
            power.push(c.re * c.re + c.im * c.im);
        }
    }
    (power, n_frames)
}

/// Convert 16 kHz mono PCM into the normalized log-mel tensor
/// `[1, n_mels, n_frames]` the encoder expects.
///
/// # Errors
///
/// Returns an error if tensor construction fails.
pub fn pcm_to_mel(
    audio: &[f32],
    n_mels: usize,
    filters: &[f32],
    device: &Device,
) -> Result<Tensor> {
    let n_freqs = N_FFT / 2 + 1;
    let window = hann_window(N_FFT);
    let padded = reflect_pad(audio, N_FFT);
    let (power, n_frames) = stft_power(&padded, &window);

    let mut mel = vec![0.0f32; n_frames * n_mels];
    for frame_idx in 0..n_frames {
        for mel_idx in 0..n_mels {
            let mut energy = 0.0f32;
            for freq_idx in 0..n_freqs {
                energy += power[frame_idx * n_freqs + freq_idx]
                    * filters[mel_idx * n_freqs + freq_idx];
            }
            mel[frame_idx * n_mels + mel_idx] = energy;
        }
    }

    for value in &mut mel {
        *value = value.max(1e-10).log10();
    }
    let max_val = mel.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let clip_min = max_val - 8.0;
    for value in &mut mel {
        *value = (value.max(clip_min) + 4.0) / 4.0;
    }

    let tensor = Tensor::from_vec(mel, (n_frames, n_mels), device)?;
    Ok(tensor.t()?.unsqueeze(0)?)
}
