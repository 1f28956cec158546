// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;

/// Ceiling on the absolute sample value a capture is allowed to report.
/// Buffers at or beyond this are treated as driver garbage.
pub const GARBAGE_PEAK: f32 = 2.0;

/// Root-mean-square level of a sample block.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

#[must_use]
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|&x| x.abs()).fold(0.0f32, f32::max)
}

/// Whether a captured buffer is usable: non-empty, finite, peak below the
/// garbage ceiling.
#[must_use]
pub fn is_valid_audio(samples: &[f32]) -> bool {
    if samples.is_empty() {
        return false;
    }
    let p = peak(samples);
    p.is_finite() && p < GARBAGE_PEAK
}

#[derive(Debug, Clone, Copy)]
pub enum ResampleQuality {
    Fast,
    HighQuality,
}

/// Sinc resampling of a mono buffer.
///
/// # Errors
///
/// Returns an error if the resampler cannot be constructed or processing
/// fails.
pub fn resample(
    samples: &[f32],
    from_sr: u32,
    to_sr: u32,
    quality: ResampleQuality,
) -> Result<Vec<f32>> {
    if from_sr == to_sr || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = match quality {
        ResampleQuality::Fast => SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Nearest,
            oversampling_factor: 16,
            window: WindowFunction::Hann,
        },
        ResampleQuality::HighQuality => SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
    };

    let mut resampler = SincFixedIn::<f32>::new(
        f64::from(to_sr) / f64::from(from_sr),
        2.0,
        params,
        samples.len(),
        1,
    )?;

    let waves_in = vec![samples.to_vec()];
    let waves_out = resampler.process(&waves_in, None)?;

    waves_out
        .into_iter()
        .next()
        .context("resampler produced no output channel")
}

/// Read a WAV file as mono f32, downmixing channels.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or has an unsupported
/// sample format.
#[allow(clippy::cast_precision_loss)]
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = f32::from(i16::MAX);
            match spec.bits_per_sample {
                16 => reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| f32::from(v) / scale))
                    .collect::<std::result::Result<_, _>>()?,
                32 => reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / 2_147_483_648.0))
                    .collect::<std::result::Result<_, _>>()?,
                bits => anyhow::bail!("unsupported WAV bit depth: {bits}"),
            }
        }
    };

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Write a mono f32 buffer as a 16-bit PCM WAV file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
#[allow(clippy::cast_possible_truncation)]
pub fn write_wav_mono(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(value)?;
    }
    writer.finalize()?;
    Ok(())
}
