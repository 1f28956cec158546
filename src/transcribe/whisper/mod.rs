// SPDX-License-Identifier: GPL-3.0-only

//! Candle-backed Whisper engine: weights loading, mel front end, greedy
//! decode with a temperature ladder, and the energy-gate VAD filter.

pub mod audio;
pub mod download;
pub mod vad;

use crate::audio::processing::{ResampleQuality, resample};
use crate::models::{ComputeKind, DeviceKind, WhisperModelId};
use crate::transcribe::engine::{
    DecodeInfo, DecodeOptions, EngineError, EngineSegment, ModelEngine, SegmentFlow, SpeechModel,
};
use anyhow::{Context, Result, anyhow};
use audio::{CHUNK_FRAMES, HOP_LENGTH, N_FFT, SAMPLE_RATE};
use candle_core::utils::cuda_is_available;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::{log_softmax, softmax};
use candle_transformers::models::whisper as m;
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;
use tokenizers::Tokenizer;

const FALLBACK_TEMPERATURES: [f32; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Marker for deadline expiry inside the decode internals; unwrapped into
/// `EngineError::DeadlineExceeded` at the trait boundary.
#[derive(Debug, thiserror::Error)]
#[error("decode deadline exceeded")]
struct DeadlineMarker;

fn into_engine_error(err: anyhow::Error) -> EngineError {
    if err.is::<DeadlineMarker>() {
        EngineError::DeadlineExceeded
    } else {
        EngineError::decode(&err)
    }
}

/// Proxy for the reference compression-ratio check: repeated text collapses
/// to few distinct 4-grams, pushing the ratio up.
#[allow(clippy::cast_precision_loss)]
fn repetition_ratio(text: &str) -> f32 {
    let bytes = text.as_bytes();
    if bytes.len() < 8 {
        return 1.0;
    }
    let mut grams = std::collections::HashSet::new();
    for window in bytes.windows(4) {
        grams.insert(window);
    }
    bytes.len() as f32 / grams.len() as f32
}

/// Factory for Candle Whisper models.
#[derive(Default)]
pub struct CandleWhisperEngine;

impl CandleWhisperEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModelEngine for CandleWhisperEngine {
    fn gpu_available(&self) -> bool {
        cuda_is_available()
    }

    fn load(
        &self,
        model: WhisperModelId,
        device: DeviceKind,
        compute: ComputeKind,
    ) -> Result<Box<dyn SpeechModel>, EngineError> {
        let loaded =
            WhisperSpeechModel::load(model, device, compute).map_err(|e| EngineError::load(&e))?;
        Ok(Box::new(loaded))
    }
}

struct WindowDecode {
    text: String,
    avg_log_prob: f64,
    no_speech_prob: f64,
}

pub struct WhisperSpeechModel {
    model: m::model::Whisper,
    tokenizer: Tokenizer,
    device: Device,
    config: m::Config,
    mel_filters: Vec<f32>,
    suppress_tokens: Tensor,
    sot_token: u32,
    eot_token: u32,
    transcribe_token: Option<u32>,
    no_timestamps_token: Option<u32>,
    language_token: Option<u32>,
    no_speech_token: Option<u32>,
}

impl WhisperSpeechModel {
    /// Load model weights, tokenizer, and the mel filter bank.
    ///
    /// # Errors
    ///
    /// Returns an error when files cannot be fetched or the weights fail to
    /// initialize on the selected device.
    pub fn load(
        model_id: WhisperModelId,
        device_kind: DeviceKind,
        compute: ComputeKind,
    ) -> Result<Self> {
        info!("Loading Whisper {model_id} model…");

        let device = match device_kind {
            DeviceKind::Cuda => Device::new_cuda(0).context("failed to create CUDA device")?,
            DeviceKind::Cpu => Device::Cpu,
            DeviceKind::Auto => {
                if cuda_is_available() {
                    Device::new_cuda(0).context("failed to create CUDA device")?
                } else {
                    Device::Cpu
                }
            }
        };

        let dtype = match compute {
            ComputeKind::Float16 | ComputeKind::Auto if device.is_cuda() => DType::F16,
            ComputeKind::Float16 => {
                debug!("float16 unsupported on CPU, using float32");
                DType::F32
            }
            ComputeKind::Int8 => {
                debug!("int8 not supported by this backend, using float32");
                DType::F32
            }
            ComputeKind::Auto => DType::F32,
        };

        let files = download::ensure_model_files(model_id)?;
        let config_path = find_file(&files, "config.json")?;
        let tokenizer_path = find_file(&files, "tokenizer.json")?;
        let weights_path = find_file(&files, "model.safetensors")?;

        let config: m::Config = serde_json::from_str(
            &std::fs::read_to_string(config_path).context("failed to read config file")?,
        )
        .context("failed to parse config")?;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;

        let mel_filters = audio::mel_filter_bank(config.num_mel_bins, N_FFT / 2 + 1);

        info!("Loading model weights…");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], dtype, &device)
                .context("failed to load model weights")?
        };
        let model = m::model::Whisper::load(&vb, config.clone())
            .context("failed to create Whisper model")?;

        let sot_token = tokenizer
            .token_to_id(m::SOT_TOKEN)
            .ok_or_else(|| anyhow!("missing start-of-transcript token"))?;
        let eot_token = tokenizer
            .token_to_id(m::EOT_TOKEN)
            .ok_or_else(|| anyhow!("missing end-of-text token"))?;
        // English-only checkpoints carry no task or language tokens.
        let transcribe_token = tokenizer.token_to_id(m::TRANSCRIBE_TOKEN);
        let no_timestamps_token = tokenizer.token_to_id(m::NO_TIMESTAMPS_TOKEN);
        let language_token = tokenizer.token_to_id("<|en|>");
        let no_speech_token = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| tokenizer.token_to_id(token));

        #[allow(clippy::cast_precision_loss)]
        let suppress: Vec<f32> = (0..config.vocab_size)
            .map(|i| {
                if config
                    .suppress_tokens
                    .contains(&u32::try_from(i).unwrap_or(u32::MAX))
                {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress.as_slice(), &device)?;

        info!("Whisper model loaded on {device:?}");

        Ok(Self {
            model,
            tokenizer,
            device,
            config,
            mel_filters,
            suppress_tokens,
            sot_token,
            eot_token,
            transcribe_token,
            no_timestamps_token,
            language_token,
            no_speech_token,
        })
    }

    fn decode_window(&mut self, mel: &Tensor, temperature: f32, deadline: Instant) -> Result<WindowDecode> {
        let audio_features = self.model.encoder.forward(mel, true)?;

        let mut tokens = vec![self.sot_token];
        if let Some(language) = self.language_token {
            tokens.push(language);
        }
        if let Some(transcribe) = self.transcribe_token {
            tokens.push(transcribe);
        }
        if let Some(no_timestamps) = self.no_timestamps_token {
            tokens.push(no_timestamps);
        }
        let prompt_len = tokens.len();

        let sample_len = self.config.max_target_positions / 2;
        let mut sum_logprob = 0.0f64;
        let mut no_speech_prob = 0.0f64;

        for i in 0..sample_len {
            if Instant::now() >= deadline {
                return Err(anyhow::Error::new(DeadlineMarker));
            }

            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;

            if i == 0 {
                if let Some(no_speech) = self.no_speech_token {
                    let first_logits = self
                        .model
                        .decoder
                        .final_linear(&ys.i(..1)?)?
                        .i(0)?
                        .i(0)?
                        .to_dtype(DType::F32)?;
                    no_speech_prob = f64::from(
                        softmax(&first_logits, 0)?
                            .i(no_speech as usize)?
                            .to_scalar::<f32>()?,
                    );
                }
            }

            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .to_dtype(DType::F32)?
                .broadcast_add(&self.suppress_tokens)?;

            let scaled = if temperature > 0.0 {
                (&logits / f64::from(temperature))?
            } else {
                logits.clone()
            };
            let probs: Vec<f32> = softmax(&scaled, 0)?.to_vec1()?;
            let next_token = probs
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(idx, _)| u32::try_from(idx).unwrap_or(self.eot_token))
                .unwrap_or(self.eot_token);

            let logprob = log_softmax(&logits, 0)?
                .i(next_token as usize)?
                .to_scalar::<f32>()?;
            sum_logprob += f64::from(logprob);

            tokens.push(next_token);
            if next_token == self.eot_token || tokens.len() > self.config.max_target_positions {
                break;
            }
        }

        let decoded_count = tokens.len() - prompt_len;
        let avg_log_prob = if decoded_count > 0 {
            sum_logprob / decoded_count as f64
        } else {
            0.0
        };

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("tokenizer decode error: {e}"))?;

        Ok(WindowDecode {
            text: text.trim().to_string(),
            avg_log_prob,
            no_speech_prob,
        })
    }

    fn decode_with_fallback(&mut self, mel: &Tensor, opts: &DecodeOptions) -> Result<WindowDecode> {
        let mut temperatures: Vec<f32> = vec![opts.temperature];
        temperatures.extend(FALLBACK_TEMPERATURES.iter().copied().filter(|&t| t > opts.temperature));

        let last_index = temperatures.len() - 1;
        for (i, &temperature) in temperatures.iter().enumerate() {
            match self.decode_window(mel, temperature, opts.deadline) {
                Ok(decode) => {
                    let silent = decode.no_speech_prob > f64::from(opts.no_speech_threshold);
                    let needs_fallback = repetition_ratio(&decode.text)
                        > opts.compression_ratio_threshold
                        || decode.avg_log_prob < f64::from(opts.log_prob_threshold);
                    if silent || !needs_fallback || i == last_index {
                        if i > 0 {
                            debug!("Used fallback temperature {temperature}");
                        }
                        return Ok(decode);
                    }
                }
                Err(e) => {
                    if e.is::<DeadlineMarker>() || i == last_index {
                        return Err(e);
                    }
                    debug!("Temperature {temperature} failed, trying next: {e:#}");
                }
            }
        }
        unreachable!("temperature ladder always returns")
    }
}

impl SpeechModel for WhisperSpeechModel {
    #[allow(clippy::cast_precision_loss, clippy::too_many_lines)]
    fn transcribe(
        &mut self,
        audio_in: &[f32],
        sample_rate: u32,
        opts: &DecodeOptions,
        sink: &mut dyn FnMut(EngineSegment) -> SegmentFlow,
    ) -> Result<DecodeInfo, EngineError> {
        let audio16k = if sample_rate == SAMPLE_RATE {
            audio_in.to_vec()
        } else {
            debug!("Resampling input from {sample_rate}Hz to {SAMPLE_RATE}Hz");
            resample(audio_in, sample_rate, SAMPLE_RATE, ResampleQuality::Fast)
                .map_err(|e| EngineError::decode(&e))?
        };
        let duration_s = audio16k.len() as f32 / SAMPLE_RATE as f32;
        let info = DecodeInfo {
            language: "en".to_string(),
            language_probability: 1.0,
            duration_s,
        };

        let (decode_audio, regions) = if opts.vad_filter {
            let regions = vad::detect_speech_regions(&audio16k, SAMPLE_RATE, &opts.vad);
            if regions.is_empty() {
                debug!("VAD found no speech regions");
                return Ok(info);
            }
            (vad::collect_regions(&audio16k, &regions), Some(regions))
        } else {
            (audio16k, None)
        };

        let mel = audio::pcm_to_mel(
            &decode_audio,
            self.config.num_mel_bins,
            &self.mel_filters,
            &self.device,
        )
        .map_err(into_engine_error)?;
        let (_, _, content_frames) = mel
            .dims3()
            .map_err(|e| EngineError::decode(&anyhow::Error::new(e)))?;

        let mut seek = 0;
        while seek < content_frames {
            if Instant::now() >= opts.deadline {
                return Err(EngineError::DeadlineExceeded);
            }
            let window_start = Instant::now();
            let segment_size = usize::min(content_frames - seek, CHUNK_FRAMES);
            let mel_segment = mel
                .narrow(2, seek, segment_size)
                .map_err(|e| EngineError::decode(&anyhow::Error::new(e)))?;

            let decode = self
                .decode_with_fallback(&mel_segment, opts)
                .map_err(into_engine_error)?;
            debug!(
                "Window at frame {seek} decoded in {:?}",
                window_start.elapsed()
            );

            let start_sample = seek * HOP_LENGTH;
            let end_sample = ((seek + segment_size) * HOP_LENGTH).min(decode_audio.len());
            let (start_s, end_s) = match &regions {
                Some(regions) => (
                    vad::map_to_original(regions, start_sample) as f32 / SAMPLE_RATE as f32,
                    vad::map_to_original(regions, end_sample) as f32 / SAMPLE_RATE as f32,
                ),
                None => (
                    start_sample as f32 / SAMPLE_RATE as f32,
                    end_sample as f32 / SAMPLE_RATE as f32,
                ),
            };

            let silent_window = decode.no_speech_prob > f64::from(opts.no_speech_threshold)
                && decode.avg_log_prob < f64::from(opts.log_prob_threshold);
            if !silent_window && !decode.text.is_empty() {
                #[allow(clippy::cast_possible_truncation)]
                let avg_log_prob = decode.avg_log_prob as f32;
                let flow = sink(EngineSegment {
                    text: decode.text,
                    start_s,
                    end_s,
                    avg_log_prob,
                });
                if flow == SegmentFlow::Stop {
                    break;
                }
            } else if silent_window {
                debug!("Window at frame {seek} gated as non-speech");
            }

            seek += segment_size;
        }

        Ok(info)
    }
}

fn find_file<'a>(files: &'a [PathBuf], name: &str) -> Result<&'a PathBuf> {
    files
        .iter()
        .find(|p| p.file_name().and_then(|f| f.to_str()) == Some(name))
        .ok_or_else(|| anyhow!("{name} not found in model cache"))
}
