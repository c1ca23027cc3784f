//! # Request and Result Types
//!
//! Data model shared across the transcription pipeline: per-request options,
//! the structured engine options mapping, and the timed segment/word output
//! produced by inference and consumed by post-processing and formatting.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Transcription task requested by the caller.
///
/// Whisper supports transcribing in the source language or translating
/// into English. This is a closed enumeration; unknown task strings are
/// rejected at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Transcribe,
    Translate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Translate => "translate",
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Task::Transcribe
    }
}

impl std::str::FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            _ => Err(anyhow!("Unknown task: {}", s)),
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Speaker count bounds for diarization-capable engines.
///
/// Accepted on every request for API compatibility; the candle whisper
/// engine does not diarize and ignores them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiarizationBounds {
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
}

impl DiarizationBounds {
    pub fn is_set(&self) -> bool {
        self.min_speakers.is_some() || self.max_speakers.is_some()
    }
}

/// Options for a single transcription request.
///
/// Immutable once constructed; built by the HTTP layer from query
/// parameters and handed to the coordinator by reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Transcribe in source language or translate to English.
    pub task: Task,

    /// ISO 639-1 language hint ("en", "es", ...). None = auto-detect.
    pub language: Option<String>,

    /// Optional text prompt to bias decoding.
    pub initial_prompt: Option<String>,

    /// Request word-level timestamps in the result.
    pub word_timestamps: bool,

    /// Voice-activity filtering before inference.
    pub vad_filter: bool,

    /// Speaker count bounds for diarization-capable engines.
    pub diarization: DiarizationBounds,
}

/// Structured options mapping handed to the inference kernel.
///
/// The task is always present. Every other field is an explicit
/// `Option`, populated only when the request set it: the kernel treats
/// an absent flag and an explicit `false` identically, so unset boolean
/// options are simply omitted rather than coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub task: Task,
    pub language: Option<String>,
    pub initial_prompt: Option<String>,
    pub word_timestamps: Option<bool>,
    pub vad_filter: Option<bool>,
    pub diarization: Option<DiarizationBounds>,
}

impl EngineOptions {
    /// Build the engine mapping from request options, omitting unset fields.
    pub fn from_request(options: &RequestOptions) -> Self {
        Self {
            task: options.task,
            language: options.language.clone().filter(|l| !l.is_empty()),
            initial_prompt: options.initial_prompt.clone().filter(|p| !p.is_empty()),
            word_timestamps: options.word_timestamps.then_some(true),
            vad_filter: options.vad_filter.then_some(true),
            diarization: options.diarization.is_set().then_some(options.diarization),
        }
    }

    /// Whether the caller asked for word-level timestamps.
    pub fn wants_word_timestamps(&self) -> bool {
        self.word_timestamps.unwrap_or(false)
    }
}

/// A single word with sub-segment timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub text: String,
}

/// A contiguous timed span of transcribed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds. Invariant after post-processing: start <= end.
    pub end: f64,
    pub text: String,
    /// Word-level timestamps, present only when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

/// Complete result of one inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    /// Detected or caller-supplied language code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Full concatenated transcript.
    pub text: String,

    /// Ordered timed segments.
    pub segments: Vec<Segment>,
}

impl TranscriptionOutput {
    pub fn empty() -> Self {
        Self {
            language: None,
            text: String::new(),
            segments: Vec::new(),
        }
    }
}

/// Result of the language-classification path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageDetection {
    /// ISO 639-1 code of the most probable language.
    pub language_code: String,
    /// Human-readable language name.
    pub language_name: String,
    /// Posterior probability of the detected language, in [0, 1].
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parsing() {
        assert_eq!("transcribe".parse::<Task>().unwrap(), Task::Transcribe);
        assert_eq!("TRANSLATE".parse::<Task>().unwrap(), Task::Translate);
        assert!("summarize".parse::<Task>().is_err());
        assert_eq!(Task::default(), Task::Transcribe);
    }

    #[test]
    fn test_engine_options_omit_unset_fields() {
        let request = RequestOptions {
            task: Task::Transcribe,
            language: None,
            initial_prompt: None,
            word_timestamps: false,
            vad_filter: false,
            diarization: DiarizationBounds::default(),
        };
        let engine = EngineOptions::from_request(&request);

        assert_eq!(engine.task, Task::Transcribe);
        assert_eq!(engine.language, None);
        assert_eq!(engine.initial_prompt, None);
        assert_eq!(engine.word_timestamps, None);
        assert_eq!(engine.vad_filter, None);
        assert_eq!(engine.diarization, None);
        assert!(!engine.wants_word_timestamps());
    }

    #[test]
    fn test_engine_options_include_set_fields() {
        let request = RequestOptions {
            task: Task::Translate,
            language: Some("es".to_string()),
            initial_prompt: Some("Hola".to_string()),
            word_timestamps: true,
            vad_filter: true,
            diarization: DiarizationBounds {
                min_speakers: Some(1),
                max_speakers: Some(3),
            },
        };
        let engine = EngineOptions::from_request(&request);

        assert_eq!(engine.task, Task::Translate);
        assert_eq!(engine.language.as_deref(), Some("es"));
        assert_eq!(engine.initial_prompt.as_deref(), Some("Hola"));
        assert_eq!(engine.word_timestamps, Some(true));
        assert_eq!(engine.vad_filter, Some(true));
        assert!(engine.diarization.is_some());
        assert!(engine.wants_word_timestamps());
    }

    #[test]
    fn test_engine_options_empty_strings_are_unset() {
        let request = RequestOptions {
            language: Some(String::new()),
            initial_prompt: Some(String::new()),
            ..Default::default()
        };
        let engine = EngineOptions::from_request(&request);
        assert_eq!(engine.language, None);
        assert_eq!(engine.initial_prompt, None);
    }
}
