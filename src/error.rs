//! # Error Handling
//!
//! Service-level error taxonomy and its mapping to HTTP responses.
//!
//! ## Error Categories:
//! - **ModelLoad**: the model failed to load (missing weights, unsupported
//!   device, out of memory). Fatal for the triggering request; the lifecycle
//!   manager leaves the model slot empty so a later request can retry.
//! - **Inference**: failure during transcription or language detection.
//!   Request-scoped; the loaded model stays usable.
//! - **BadRequest**: the client sent something we cannot process
//!   (undecodable audio, missing upload field, invalid parameters).
//! - **Config**: invalid configuration; caught at startup, never per request.
//! - **Internal**: anything else that escapes the layers above.
//!
//! Unsupported output formats are deliberately *not* represented here:
//! they silently fall back to plain-text rendering.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AsrError {
    /// Model failed to load; the model slot is left empty for retry.
    ModelLoad(String),

    /// Inference failed; the loaded model remains usable.
    Inference(String),

    /// Client sent invalid or undecodable data.
    BadRequest(String),

    /// Invalid configuration, rejected at startup.
    Config(String),

    /// Unexpected server-side failure.
    Internal(String),
}

impl fmt::Display for AsrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsrError::ModelLoad(msg) => write!(f, "Model load error: {}", msg),
            AsrError::Inference(msg) => write!(f, "Inference error: {}", msg),
            AsrError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AsrError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AsrError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AsrError {}

impl ResponseError for AsrError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AsrError::ModelLoad(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "model_load_error",
                msg.clone(),
            ),
            AsrError::Inference(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "inference_error",
                msg.clone(),
            ),
            AsrError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AsrError::Config(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AsrError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AsrError {
    fn from(err: anyhow::Error) -> Self {
        AsrError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AsrError {
    fn from(err: serde_json::Error) -> Self {
        AsrError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<config::ConfigError> for AsrError {
    fn from(err: config::ConfigError) -> Self {
        AsrError::Config(err.to_string())
    }
}

pub type AsrResult<T> = Result<T, AsrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AsrError::ModelLoad("weights not found".to_string());
        assert_eq!(err.to_string(), "Model load error: weights not found");

        let err = AsrError::Inference("decode failed".to_string());
        assert_eq!(err.to_string(), "Inference error: decode failed");
    }

    #[test]
    fn test_status_codes() {
        use actix_web::http::StatusCode;

        let response = AsrError::BadRequest("no audio".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AsrError::ModelLoad("oom".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AsrError::Inference("kernel".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: AsrError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AsrError::Internal(_)));
    }
}
