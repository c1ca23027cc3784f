//! # Whisper Model Resource
//!
//! The loaded acoustic model: candle weights, tokenizer and mel filters on
//! a chosen device. A resource is never partially initialized; `load`
//! either returns a fully usable model or an error, and the lifecycle
//! manager keeps the slot empty on failure so a later request can retry.
//!
//! ## Model Loading Process:
//! 1. Download config/tokenizer/weights from HuggingFace (cached locally,
//!    honouring the configured model storage path)
//! 2. Build the model on the selected device
//! 3. Resolve the special tokens and language token table
//!
//! Inference is greedy (argmax) throughout, so repeated calls on the same
//! waveform and model state return identical results.

use crate::config::ModelConfig;
use crate::transcription::types::{EngineOptions, Segment, Task, TranscriptionOutput, Word};
use anyhow::{anyhow, bail, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Languages Whisper was trained on, as (ISO code, English name).
const LANGUAGES: &[(&str, &str)] = &[
    ("en", "english"),
    ("zh", "chinese"),
    ("de", "german"),
    ("es", "spanish"),
    ("ru", "russian"),
    ("ko", "korean"),
    ("fr", "french"),
    ("ja", "japanese"),
    ("pt", "portuguese"),
    ("tr", "turkish"),
    ("pl", "polish"),
    ("ca", "catalan"),
    ("nl", "dutch"),
    ("ar", "arabic"),
    ("sv", "swedish"),
    ("it", "italian"),
    ("id", "indonesian"),
    ("hi", "hindi"),
    ("fi", "finnish"),
    ("vi", "vietnamese"),
    ("he", "hebrew"),
    ("uk", "ukrainian"),
    ("el", "greek"),
    ("ms", "malay"),
    ("cs", "czech"),
    ("ro", "romanian"),
    ("da", "danish"),
    ("hu", "hungarian"),
    ("ta", "tamil"),
    ("no", "norwegian"),
    ("th", "thai"),
    ("ur", "urdu"),
    ("hr", "croatian"),
    ("bg", "bulgarian"),
    ("lt", "lithuanian"),
    ("la", "latin"),
    ("mi", "maori"),
    ("ml", "malayalam"),
    ("cy", "welsh"),
    ("sk", "slovak"),
    ("te", "telugu"),
    ("fa", "persian"),
    ("lv", "latvian"),
    ("bn", "bengali"),
    ("sr", "serbian"),
    ("az", "azerbaijani"),
    ("sl", "slovenian"),
    ("kn", "kannada"),
    ("et", "estonian"),
    ("mk", "macedonian"),
];

/// All (code, name) pairs the engine can report.
pub fn supported_languages() -> &'static [(&'static str, &'static str)] {
    LANGUAGES
}

/// Human-readable name for a language code, for API responses.
pub fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Resolve the HuggingFace repository for a configured model name.
///
/// Short size names map to the official OpenAI repositories; anything
/// containing a slash is used as a repository id verbatim.
fn repo_for(name: &str) -> Result<String> {
    if name.contains('/') {
        return Ok(name.to_string());
    }
    let repo = match name.to_lowercase().as_str() {
        "tiny" => "openai/whisper-tiny",
        "base" => "openai/whisper-base",
        "small" => "openai/whisper-small",
        "medium" => "openai/whisper-medium",
        "large" => "openai/whisper-large-v2",
        "large-v3" => "openai/whisper-large-v3",
        _ => bail!("Unknown model name: {}", name),
    };
    Ok(repo.to_string())
}

/// The loaded Whisper model and everything needed to run it.
pub struct WhisperResource {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    device: Device,
    loaded_at: Instant,

    sot_token: u32,
    eot_token: u32,
    transcribe_token: u32,
    translate_token: u32,
    sot_prev_token: Option<u32>,
    /// Token id of `<|0.00|>`; ids at or above it encode timestamps.
    timestamp_begin: u32,
    /// (token id, language code) for every language the tokenizer knows.
    language_tokens: Vec<(u32, &'static str)>,
}

impl WhisperResource {
    /// Download (or reuse cached) model files and build the model.
    pub async fn load(model: &ModelConfig, device: Device) -> Result<Self> {
        let repo_name = repo_for(&model.name)?;
        info!("Loading Whisper model from {}", repo_name);
        let start_time = Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;
            let mut builder = ApiBuilder::new()
                .with_token(std::env::var("HF_TOKEN").ok())
                .with_progress(false);
            if let Some(path) = &model.path {
                builder = builder.with_cache_dir(path.into());
            }
            builder.build()?
        };
        let repo = api.model(repo_name.clone());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", repo_name, e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", repo_name, e))?;
        let weights_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", repo_name, e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let mel_filters = mel_filter_bank(config.num_mel_bins as usize);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], m::DTYPE, &device)?
        };
        let whisper = m::model::Whisper::load(&vb, config.clone())?;

        let token_id = |token: &str| -> Result<u32> {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
        };
        let sot_token = token_id("<|startoftranscript|>")?;
        let eot_token = token_id("<|endoftext|>")?;
        let transcribe_token = token_id("<|transcribe|>")?;
        let translate_token = token_id("<|translate|>")?;
        let sot_prev_token = tokenizer.token_to_id("<|startofprev|>");
        let timestamp_begin = token_id("<|0.00|>")?;

        let language_tokens: Vec<(u32, &'static str)> = LANGUAGES
            .iter()
            .filter_map(|(code, _)| {
                tokenizer
                    .token_to_id(&format!("<|{}|>", code))
                    .map(|id| (id, *code))
            })
            .collect();
        if language_tokens.is_empty() {
            bail!("Tokenizer exposes no language tokens");
        }

        info!(
            "Whisper model loaded in {:.2}s ({} mel bins, {} languages)",
            start_time.elapsed().as_secs_f64(),
            config.num_mel_bins,
            language_tokens.len()
        );

        Ok(Self {
            model: whisper,
            config,
            tokenizer,
            mel_filters,
            device,
            loaded_at: Instant::now(),
            sot_token,
            eot_token,
            transcribe_token,
            translate_token,
            sot_prev_token,
            timestamp_begin,
            language_tokens,
        })
    }

    /// How long ago this resource finished loading.
    pub fn loaded_for(&self) -> std::time::Duration {
        self.loaded_at.elapsed()
    }

    /// Transcribe (or translate) a 16 kHz mono waveform.
    ///
    /// The waveform is processed in 30 second windows; each window is
    /// encoded once and decoded greedily, splitting segments on the
    /// model's timestamp tokens. Language is taken from the options when
    /// present, otherwise detected on the first window and reused.
    pub fn infer(&mut self, waveform: &[f32], options: &EngineOptions) -> Result<TranscriptionOutput> {
        if waveform.is_empty() {
            bail!("Audio is empty");
        }

        let mut detected_language = options.language.clone();
        let mut segments: Vec<Segment> = Vec::new();

        let mut offset = 0usize;
        while offset < waveform.len() {
            let end = (offset + m::N_SAMPLES).min(waveform.len());
            let chunk = &waveform[offset..end];
            let time_offset = offset as f64 / m::SAMPLE_RATE as f64;
            let chunk_duration = chunk.len() as f64 / m::SAMPLE_RATE as f64;

            let mel = self.mel_spectrogram(chunk)?;
            let audio_features = self.model.encoder.forward(&mel, true)?;

            if detected_language.is_none() {
                let (code, confidence) = self.classify_language(&audio_features)?;
                debug!("Detected language {} ({:.2})", code, confidence);
                detected_language = Some(code);
            }

            let tokens = self.decode_greedy(
                &audio_features,
                detected_language.as_deref(),
                options.task,
                options.initial_prompt.as_deref(),
            )?;
            let mut chunk_segments =
                self.segments_from_tokens(&tokens, time_offset, chunk_duration)?;

            if options.wants_word_timestamps() {
                for segment in &mut chunk_segments {
                    segment.words = Some(apportion_words(segment));
                }
            }
            segments.extend(chunk_segments);

            offset += m::N_SAMPLES;
        }

        let text = segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(TranscriptionOutput {
            language: detected_language,
            text,
            segments,
        })
    }

    /// Classify the spoken language of a waveform.
    ///
    /// Pads/trims to one 30 second window, encodes it, and softmaxes the
    /// first decoder step's logits over the language tokens only.
    pub fn detect_language(&mut self, waveform: &[f32]) -> Result<(String, f32)> {
        if waveform.is_empty() {
            bail!("Audio is empty");
        }
        let window = &waveform[..waveform.len().min(m::N_SAMPLES)];
        let mel = self.mel_spectrogram(window)?;
        let audio_features = self.model.encoder.forward(&mel, true)?;
        self.classify_language(&audio_features)
    }

    fn classify_language(&mut self, audio_features: &Tensor) -> Result<(String, f32)> {
        let tokens = Tensor::new(&[self.sot_token], &self.device)?.unsqueeze(0)?;
        let ys = self.model.decoder.forward(&tokens, audio_features, true)?;
        let logits = self
            .model
            .decoder
            .final_linear(&ys.i((..1, ..))?)?
            .i(0)?
            .i(0)?;

        let ids: Vec<u32> = self.language_tokens.iter().map(|(id, _)| *id).collect();
        let ids = Tensor::new(ids.as_slice(), &self.device)?;
        let language_logits = logits.index_select(&ids, 0)?;
        let probs = softmax(&language_logits, D::Minus1)?.to_vec1::<f32>()?;

        let (best, confidence) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .ok_or_else(|| anyhow!("Empty language probability vector"))?;

        Ok((self.language_tokens[best].1.to_string(), *confidence))
    }

    /// Compute the log-mel spectrogram tensor for one (padded) window.
    fn mel_spectrogram(&self, chunk: &[f32]) -> Result<Tensor> {
        // The encoder expects exactly one 30s window of frames.
        let mut padded = vec![0.0f32; m::N_SAMPLES];
        let len = chunk.len().min(m::N_SAMPLES);
        padded[..len].copy_from_slice(&chunk[..len]);

        let mel = audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
        let mel_len = mel.len();
        let n_mels = self.config.num_mel_bins as usize;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;
        Ok(mel)
    }

    /// Greedy decode of one encoded window.
    fn decode_greedy(
        &mut self,
        audio_features: &Tensor,
        language: Option<&str>,
        task: Task,
        initial_prompt: Option<&str>,
    ) -> Result<Vec<u32>> {
        let mut tokens: Vec<u32> = Vec::new();

        // Previous-context conditioning for the initial prompt.
        if let (Some(prompt), Some(sot_prev)) = (initial_prompt, self.sot_prev_token) {
            let encoded = self
                .tokenizer
                .encode(prompt, false)
                .map_err(|e| anyhow!("Failed to encode prompt: {}", e))?;
            tokens.push(sot_prev);
            tokens.extend_from_slice(encoded.get_ids());
        }

        tokens.push(self.sot_token);
        if let Some(lang) = language {
            if let Some((id, _)) = self.language_tokens.iter().find(|(_, code)| *code == lang) {
                tokens.push(*id);
            }
        }
        tokens.push(match task {
            Task::Transcribe => self.transcribe_token,
            Task::Translate => self.translate_token,
        });

        let max_new_tokens = (self.config.max_target_positions / 2).max(1);
        let mut output: Vec<u32> = Vec::new();

        for i in 0..max_new_tokens {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, audio_features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits: Vec<f32> = logits.to_vec1()?;

            let next = logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx as u32)
                .ok_or_else(|| anyhow!("Empty logits vector"))?;

            if next == self.eot_token {
                break;
            }
            if is_repetitive(&output, next) {
                debug!("Stopping decode on repetition at step {}", i);
                break;
            }

            tokens.push(next);
            output.push(next);
        }

        Ok(output)
    }

    /// Split decoded tokens into timed segments on timestamp tokens.
    ///
    /// Timestamp token ids encode 20ms ticks relative to the window start.
    /// Windows decoded without any timestamps become a single segment
    /// spanning the whole window.
    fn segments_from_tokens(
        &self,
        tokens: &[u32],
        time_offset: f64,
        chunk_duration: f64,
    ) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut buffer: Vec<u32> = Vec::new();
        let mut seg_start = 0.0f64;

        for &token in tokens {
            if token >= self.timestamp_begin {
                let time = (token - self.timestamp_begin) as f64 * 0.02;
                if buffer.is_empty() {
                    seg_start = time;
                } else {
                    let text = self.decode_text(&buffer)?;
                    if !text.trim().is_empty() {
                        segments.push(Segment {
                            start: time_offset + seg_start,
                            end: time_offset + time.max(seg_start),
                            text: text.trim().to_string(),
                            words: None,
                        });
                    }
                    buffer.clear();
                    seg_start = time;
                }
            } else {
                buffer.push(token);
            }
        }

        if !buffer.is_empty() {
            let text = self.decode_text(&buffer)?;
            if !text.trim().is_empty() {
                segments.push(Segment {
                    start: time_offset + seg_start,
                    end: time_offset + chunk_duration.max(seg_start),
                    text: text.trim().to_string(),
                    words: None,
                });
            }
        }

        Ok(segments)
    }

    fn decode_text(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))
    }
}

/// Guard against the decoder locking into a repeating token pattern.
fn is_repetitive(tokens: &[u32], next: u32) -> bool {
    let n = tokens.len();
    if n >= 2 && tokens[n - 1] == next && tokens[n - 2] == next {
        return true;
    }
    if n >= 5 {
        let last = [tokens[n - 2], tokens[n - 1], next];
        let prev = [tokens[n - 5], tokens[n - 4], tokens[n - 3]];
        if last == prev {
            return true;
        }
    }
    false
}

/// Apportion a segment's duration across its words by character weight.
///
/// The greedy decoder does not produce sub-segment alignments, so word
/// timings are an estimate: each word gets a share of the segment
/// proportional to its length.
fn apportion_words(segment: &Segment) -> Vec<Word> {
    let words: Vec<&str> = segment.text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let duration = (segment.end - segment.start).max(0.0);
    let total_weight: usize = words.iter().map(|w| w.len() + 1).sum();
    let mut cursor = segment.start;
    let mut out = Vec::with_capacity(words.len());

    for word in &words {
        let share = duration * (word.len() + 1) as f64 / total_weight as f64;
        let end = (cursor + share).min(segment.end);
        out.push(Word {
            start: cursor,
            end,
            text: (*word).to_string(),
        });
        cursor = end;
    }
    // Absorb rounding drift into the last word.
    if let Some(last) = out.last_mut() {
        last.end = segment.end;
    }
    out
}

/// Triangular mel filter bank over the Whisper STFT bins (n_fft = 400,
/// 16 kHz), laid out row-major as [n_mels][n_freqs] for `pcm_to_mel`.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    const N_FREQS: usize = m::N_FFT / 2 + 1;
    const F_MAX: f64 = m::SAMPLE_RATE as f64 / 2.0;

    let hz_to_mel = |hz: f64| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f64| 700.0 * (10f64.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(F_MAX);
    let points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * N_FREQS];
    for mel in 0..n_mels {
        let (left, center, right) = (points[mel], points[mel + 1], points[mel + 2]);
        // Slaney-style area normalization.
        let norm = 2.0 / (right - left);
        for freq in 0..N_FREQS {
            let hz = F_MAX * freq as f64 / (N_FREQS - 1) as f64;
            let weight = if hz <= left || hz >= right {
                0.0
            } else if hz <= center {
                (hz - left) / (center - left)
            } else {
                (right - hz) / (right - center)
            };
            filters[mel * N_FREQS + freq] = (weight * norm) as f32;
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_mapping() {
        assert_eq!(repo_for("base").unwrap(), "openai/whisper-base");
        assert_eq!(repo_for("LARGE").unwrap(), "openai/whisper-large-v2");
        assert_eq!(
            repo_for("distil-whisper/distil-small.en").unwrap(),
            "distil-whisper/distil-small.en"
        );
        assert!(repo_for("enormous").is_err());
    }

    #[test]
    fn test_language_name_lookup() {
        assert_eq!(language_name("es"), Some("spanish"));
        assert_eq!(language_name("en"), Some("english"));
        assert_eq!(language_name("xx"), None);
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let n_mels = 80;
        let filters = mel_filter_bank(n_mels);
        assert_eq!(filters.len(), n_mels * (m::N_FFT / 2 + 1));
        assert!(filters.iter().all(|&f| f >= 0.0));
        // Every filter has some mass.
        for mel in 0..n_mels {
            let row = &filters[mel * (m::N_FFT / 2 + 1)..(mel + 1) * (m::N_FFT / 2 + 1)];
            assert!(row.iter().any(|&f| f > 0.0), "filter {} is all zeros", mel);
        }
    }

    #[test]
    fn test_repetition_guard() {
        assert!(is_repetitive(&[7, 7], 7));
        assert!(!is_repetitive(&[7, 8], 7));
        assert!(is_repetitive(&[1, 2, 3, 1, 2], 3));
        assert!(!is_repetitive(&[1, 2, 3, 4, 5], 6));
    }

    #[test]
    fn test_apportion_words_covers_segment() {
        let segment = Segment {
            start: 2.0,
            end: 4.0,
            text: "hola mundo cruel".to_string(),
            words: None,
        };
        let words = apportion_words(&segment);

        assert_eq!(words.len(), 3);
        assert_eq!(words[0].start, 2.0);
        assert_eq!(words.last().unwrap().end, 4.0);
        for pair in words.windows(2) {
            assert!(pair[0].end <= pair[1].start + 1e-9);
            assert!(pair[0].start <= pair[0].end);
        }
    }

    #[test]
    fn test_apportion_words_empty_text() {
        let segment = Segment {
            start: 0.0,
            end: 1.0,
            text: "   ".to_string(),
            words: None,
        };
        assert!(apportion_words(&segment).is_empty());
    }
}
