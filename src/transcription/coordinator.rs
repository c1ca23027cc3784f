//! # Transcription Coordinator
//!
//! Orchestrates the full request pipeline on top of the lifecycle
//! manager: mark activity, acquire the model, run inference, apply
//! language-specific timing correction, and render the requested output
//! format.
//!
//! The coordinator holds no mutable state of its own; all exclusion
//! lives in the lifecycle manager, so the coordinator itself is freely
//! shareable across request handlers.

use crate::config::{CorrectionConfig, SubtitleConfig};
use crate::error::{AsrError, AsrResult};
use crate::transcription::format::{self, OutputFormat};
use crate::transcription::lifecycle::ModelLifecycleManager;
use crate::transcription::model::language_name;
use crate::transcription::postprocess;
use crate::transcription::types::{
    EngineOptions, LanguageDetection, RequestOptions, TranscriptionOutput,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Engine identifier reported in response headers and /health.
pub const ENGINE_NAME: &str = "candle-whisper";

pub struct TranscriptionCoordinator {
    lifecycle: Arc<ModelLifecycleManager>,
    subtitle: SubtitleConfig,
    correction: CorrectionConfig,
}

impl TranscriptionCoordinator {
    pub fn new(
        lifecycle: Arc<ModelLifecycleManager>,
        subtitle: SubtitleConfig,
        correction: CorrectionConfig,
    ) -> Self {
        Self {
            lifecycle,
            subtitle,
            correction,
        }
    }

    /// Transcribe a 16 kHz mono waveform and render it as `format`.
    ///
    /// Inference runs with exclusive model access; correction and
    /// rendering happen outside the lock on the owned result.
    pub async fn transcribe(
        &self,
        waveform: Vec<f32>,
        options: &RequestOptions,
        format: OutputFormat,
    ) -> AsrResult<Vec<u8>> {
        self.lifecycle.mark_active();
        let engine_options = EngineOptions::from_request(options);
        debug!(
            task = %engine_options.task,
            language = ?engine_options.language,
            samples = waveform.len(),
            "Starting transcription"
        );

        let result = self
            .lifecycle
            .with_model(|model| {
                model
                    .infer(&waveform, &engine_options)
                    .map_err(|e| AsrError::Inference(format!("{:#}", e)))
            })
            .await?;

        info!(
            language = ?result.language,
            segments = result.segments.len(),
            "Transcription complete"
        );

        self.finish(result, format)
    }

    /// Classify the spoken language of a waveform.
    pub async fn detect_language(&self, waveform: Vec<f32>) -> AsrResult<LanguageDetection> {
        self.lifecycle.mark_active();

        let (code, confidence) = self
            .lifecycle
            .with_model(|model| {
                model
                    .detect_language(&waveform)
                    .map_err(|e| AsrError::Inference(format!("{:#}", e)))
            })
            .await?;

        info!(language = %code, confidence, "Language detected");

        Ok(LanguageDetection {
            language_name: language_name(&code).unwrap_or("unknown").to_string(),
            language_code: code,
            confidence,
        })
    }

    /// Correct timings when applicable, then render. Split out from
    /// `transcribe` so the post-inference pipeline is testable without a
    /// loaded model.
    fn finish(&self, mut result: TranscriptionOutput, format: OutputFormat) -> AsrResult<Vec<u8>> {
        if postprocess::applies(&self.correction, &result) {
            debug!(language = %self.correction.language, "Applying timing correction");
            postprocess::apply(&mut result, &self.correction);
        }
        format::render(&result, format, &self.subtitle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrectionConfig, ModelConfig, SubtitleConfig};
    use crate::transcription::types::Segment;
    use candle_core::Device;

    fn coordinator(correction: CorrectionConfig) -> TranscriptionCoordinator {
        let lifecycle = Arc::new(ModelLifecycleManager::new(
            ModelConfig {
                name: "base".to_string(),
                path: None,
                device: "cpu".to_string(),
            },
            Device::Cpu,
        ));
        TranscriptionCoordinator::new(
            lifecycle,
            SubtitleConfig {
                max_line_width: 0,
                max_line_count: 0,
                highlight_words: false,
            },
            correction,
        )
    }

    fn spanish_result() -> TranscriptionOutput {
        TranscriptionOutput {
            language: Some("es".to_string()),
            text: "hola que tal".to_string(),
            segments: vec![
                Segment {
                    start: 1.0,
                    end: 2.0,
                    text: "hola".to_string(),
                    words: None,
                },
                Segment {
                    start: 2.05,
                    end: 3.0,
                    text: "que tal".to_string(),
                    words: None,
                },
            ],
        }
    }

    #[test]
    fn test_disabled_correction_renders_raw_timestamps() {
        let coordinator = coordinator(CorrectionConfig {
            enabled: false,
            language: "es".to_string(),
            offset_ms: 200,
            min_gap_ms: 500,
        });

        let bytes = coordinator
            .finish(spanish_result(), OutputFormat::Srt)
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        // Timestamps pass through untouched when the feature is off.
        assert!(text.contains("00:00:01,000 --> 00:00:02,000"));
        assert!(text.contains("00:00:02,050 --> 00:00:03,000"));
    }

    #[test]
    fn test_enabled_correction_shifts_and_separates() {
        let coordinator = coordinator(CorrectionConfig {
            enabled: true,
            language: "es".to_string(),
            offset_ms: 200,
            min_gap_ms: 500,
        });

        let bytes = coordinator
            .finish(spanish_result(), OutputFormat::Srt)
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        // 1.0 + 0.2s offset, and the second segment pushed past the
        // first's corrected end plus the forced gap.
        assert!(text.contains("00:00:01,200 --> 00:00:02,200"));
        assert!(text.contains("00:00:02,300 --> 00:00:03,200"));
    }

    #[test]
    fn test_correction_skipped_for_other_languages() {
        let coordinator = coordinator(CorrectionConfig {
            enabled: true,
            language: "es".to_string(),
            offset_ms: 200,
            min_gap_ms: 500,
        });

        let mut result = spanish_result();
        result.language = Some("en".to_string());
        let bytes = coordinator.finish(result, OutputFormat::Srt).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.contains("00:00:01,000 --> 00:00:02,000"));
    }

    #[test]
    fn test_json_output_carries_language_and_segments() {
        let coordinator = coordinator(CorrectionConfig {
            enabled: false,
            language: "es".to_string(),
            offset_ms: 0,
            min_gap_ms: 500,
        });

        let bytes = coordinator
            .finish(spanish_result(), OutputFormat::Json)
            .unwrap();
        let parsed: TranscriptionOutput = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed.language.as_deref(), Some("es"));
        assert_eq!(parsed.segments.len(), 2);
    }
}
