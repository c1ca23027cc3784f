//! # Transcription Endpoints
//!
//! `POST /asr` accepts a multipart upload (field `audio_file`) plus query
//! parameters and returns the transcript in the requested output format.
//! `POST /detect-language` classifies the spoken language of an upload.
//!
//! Unknown `output` values are not rejected; they fall back to plain text.
//! Unknown `task` values are a client error, since silently transcribing
//! when translation was requested would corrupt results.

use crate::audio::decode_upload;
use crate::error::{AsrError, AsrResult};
use crate::state::AppState;
use crate::transcription::types::DiarizationBounds;
use crate::transcription::{OutputFormat, RequestOptions, Task, ENGINE_NAME};
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Query parameters accepted by both endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct AsrQuery {
    pub task: Option<String>,
    pub language: Option<String>,
    pub initial_prompt: Option<String>,
    #[serde(default)]
    pub vad_filter: bool,
    #[serde(default)]
    pub word_timestamps: bool,
    #[serde(default)]
    pub diarize: bool,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub output: Option<String>,
}

impl AsrQuery {
    fn request_options(&self) -> AsrResult<RequestOptions> {
        let task = match self.task.as_deref() {
            Some(raw) => raw
                .parse::<Task>()
                .map_err(|e| AsrError::BadRequest(e.to_string()))?,
            None => Task::default(),
        };

        let diarization = if self.diarize {
            DiarizationBounds {
                min_speakers: self.min_speakers,
                max_speakers: self.max_speakers,
            }
        } else {
            DiarizationBounds::default()
        };

        Ok(RequestOptions {
            task,
            language: self.language.clone(),
            initial_prompt: self.initial_prompt.clone(),
            word_timestamps: self.word_timestamps,
            vad_filter: self.vad_filter,
            diarization,
        })
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::from_tag(self.output.as_deref().unwrap_or("txt"))
    }
}

/// One uploaded audio file with its original name.
struct AudioUpload {
    bytes: Vec<u8>,
    filename: String,
}

/// Pull the `audio_file` field out of the multipart payload.
async fn read_audio_field(mut payload: Multipart) -> AsrResult<AudioUpload> {
    const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AsrError::BadRequest(format!("Multipart error: {}", e)))?;

        let Some(content_disposition) = field.content_disposition() else {
            continue;
        };
        if content_disposition.get_name() != Some("audio_file") {
            continue;
        }
        let filename = content_disposition
            .get_filename()
            .unwrap_or("audio")
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AsrError::BadRequest(format!("Upload read error: {}", e)))?;
            if bytes.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(AsrError::BadRequest(format!(
                    "Upload exceeds {} byte limit",
                    MAX_UPLOAD_BYTES
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(AudioUpload { bytes, filename });
    }

    Err(AsrError::BadRequest(
        "Missing 'audio_file' multipart field".to_string(),
    ))
}

/// `POST /asr`: transcribe an upload and return it in the requested format.
pub async fn asr(
    state: web::Data<AppState>,
    query: web::Query<AsrQuery>,
    payload: Multipart,
) -> AsrResult<HttpResponse> {
    let options = query.request_options()?;
    let format = query.output_format();

    let upload = read_audio_field(payload).await?;
    debug!(
        filename = %upload.filename,
        size_bytes = upload.bytes.len(),
        task = %options.task,
        "Received transcription request"
    );

    let waveform = decode_upload(&upload.bytes)?;
    let body = state.coordinator.transcribe(waveform, &options, format).await?;

    let attachment = attachment_name(&upload.filename, format);
    Ok(HttpResponse::Ok()
        .content_type(format.media_type())
        .insert_header(("Asr-Engine", ENGINE_NAME))
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", attachment),
        ))
        .body(body))
}

/// `POST /detect-language`: classify the spoken language of an upload.
pub async fn detect_language(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AsrResult<HttpResponse> {
    let upload = read_audio_field(payload).await?;
    let waveform = decode_upload(&upload.bytes)?;

    let detection = state.coordinator.detect_language(waveform).await?;

    Ok(HttpResponse::Ok().json(json!({
        "detected_language": detection.language_name,
        "language_code": detection.language_code,
        "confidence": detection.confidence,
    })))
}

/// `GET /languages`: the language codes the engine can report.
pub async fn languages() -> HttpResponse {
    let supported: Vec<serde_json::Value> = crate::transcription::model::supported_languages()
        .iter()
        .map(|(code, name)| json!({ "code": code, "name": name }))
        .collect();
    HttpResponse::Ok().json(json!({ "languages": supported }))
}

/// Replace the upload's extension with the output format's.
fn attachment_name(filename: &str, format: OutputFormat) -> String {
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
    let stem = if stem.is_empty() { "audio" } else { stem };
    format!("{}.{}", stem, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let query = AsrQuery::default();
        let options = query.request_options().unwrap();

        assert_eq!(options.task, Task::Transcribe);
        assert_eq!(options.language, None);
        assert!(!options.word_timestamps);
        assert!(!options.diarization.is_set());
        assert_eq!(query.output_format(), OutputFormat::Text);
    }

    #[test]
    fn test_unknown_task_is_client_error() {
        let query = AsrQuery {
            task: Some("summarize".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.request_options(),
            Err(AsrError::BadRequest(_))
        ));
    }

    #[test]
    fn test_speaker_bounds_require_diarize_flag() {
        let query = AsrQuery {
            min_speakers: Some(2),
            max_speakers: Some(4),
            ..Default::default()
        };
        // Bounds without diarize=true are ignored.
        assert!(!query.request_options().unwrap().diarization.is_set());

        let query = AsrQuery {
            diarize: true,
            min_speakers: Some(2),
            ..Default::default()
        };
        let options = query.request_options().unwrap();
        assert_eq!(options.diarization.min_speakers, Some(2));
    }

    #[test]
    fn test_unknown_output_falls_back_to_text() {
        let query = AsrQuery {
            output: Some("docx".to_string()),
            ..Default::default()
        };
        assert_eq!(query.output_format(), OutputFormat::Text);
    }

    #[test]
    fn test_attachment_naming() {
        assert_eq!(attachment_name("talk.mp3", OutputFormat::Srt), "talk.srt");
        assert_eq!(attachment_name("audio", OutputFormat::Json), "audio.json");
        assert_eq!(attachment_name(".wav", OutputFormat::Text), "audio.txt");
    }
}
