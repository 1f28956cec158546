// SPDX-License-Identifier: GPL-3.0-only

//! Energy-gate voice activity detection used as the decode front end.
//!
//! Frame activity is RMS normalized against the clip's hottest frame, with
//! an absolute floor so silence never self-normalizes into speech. Regions
//! shorter than the minimum speech length are dropped, gaps shorter than the
//! minimum silence length are merged, and surviving regions are padded.

use crate::audio::processing::rms;
use crate::transcribe::engine::VadParams;

const FRAME_MS: usize = 30;
// Frames quieter than this are never speech, whatever the clip peak.
const ABSOLUTE_SILENCE_FLOOR: f32 = 1e-4;

/// A half-open sample range of detected speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechRegion {
    pub start: usize,
    pub end: usize,
}

impl SpeechRegion {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Detect speech regions in mono audio.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn detect_speech_regions(audio: &[f32], sample_rate: u32, params: &VadParams) -> Vec<SpeechRegion> {
    let frame_len = sample_rate as usize * FRAME_MS / 1000;
    if frame_len == 0 || audio.len() < frame_len {
        return Vec::new();
    }

    let frame_rms: Vec<f32> = audio.chunks(frame_len).map(rms).collect();
    let max_rms = frame_rms.iter().copied().fold(0.0f32, f32::max);
    if max_rms < ABSOLUTE_SILENCE_FLOOR {
        return Vec::new();
    }

    let active: Vec<bool> = frame_rms
        .iter()
        .map(|&level| level >= ABSOLUTE_SILENCE_FLOOR && level / max_rms >= params.threshold)
        .collect();

    // Collect raw active runs as sample ranges.
    let mut regions: Vec<SpeechRegion> = Vec::new();
    let mut run_start: Option<usize> = None;
    for (frame_idx, &is_active) in active.iter().enumerate() {
        match (is_active, run_start) {
            (true, None) => run_start = Some(frame_idx * frame_len),
            (false, Some(start)) => {
                regions.push(SpeechRegion {
                    start,
                    end: frame_idx * frame_len,
                });
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        regions.push(SpeechRegion {
            start,
            end: audio.len(),
        });
    }

    let min_speech = sample_rate as usize * params.min_speech_duration_ms as usize / 1000;
    let min_silence = sample_rate as usize * params.min_silence_duration_ms as usize / 1000;
    let pad = sample_rate as usize * params.speech_pad_ms as usize / 1000;

    // Merge regions separated by less than the minimum silence.
    let mut merged: Vec<SpeechRegion> = Vec::new();
    for region in regions {
        match merged.last_mut() {
            Some(last) if region.start.saturating_sub(last.end) < min_silence => {
                last.end = region.end;
            }
            _ => merged.push(region),
        }
    }

    merged.retain(|region| region.len() >= min_speech);

    // Pad and clamp, keeping regions disjoint.
    let mut padded: Vec<SpeechRegion> = Vec::new();
    for region in merged {
        let start = region.start.saturating_sub(pad);
        let end = (region.end + pad).min(audio.len());
        match padded.last_mut() {
            Some(last) if start <= last.end => last.end = end,
            _ => padded.push(SpeechRegion { start, end }),
        }
    }
    padded
}

/// Concatenate the region contents for decoding.
#[must_use]
pub fn collect_regions(audio: &[f32], regions: &[SpeechRegion]) -> Vec<f32> {
    let mut out = Vec::with_capacity(regions.iter().map(SpeechRegion::len).sum());
    for region in regions {
        out.extend_from_slice(&audio[region.start..region.end]);
    }
    out
}

/// Map a sample offset in the concatenated audio back to the original
/// timeline.
#[must_use]
pub fn map_to_original(regions: &[SpeechRegion], concat_sample: usize) -> usize {
    let mut consumed = 0usize;
    for region in regions {
        let len = region.len();
        if concat_sample < consumed + len {
            return region.start + (concat_sample - consumed);
        }
        consumed += len;
    }
    regions.last().map_or(0, |r| r.end)
}
