//! # Service Status Endpoints
//!
//! `GET /status` is the minimal liveness probe external tools poll; its
//! shape (version + "ok") is load-bearing for clients and must not grow
//! incompatible fields. `GET /health` is the richer operator view with
//! uptime, model state and request counters.

use crate::device::device_label;
use crate::state::AppState;
use crate::transcription::ENGINE_NAME;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

/// Minimal liveness endpoint for external pollers.
pub async fn status() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Operator-facing health report.
pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse> {
    let metrics = state.metrics_snapshot();
    let model_loaded = state.lifecycle.is_loaded().await;

    let endpoints: serde_json::Map<String, serde_json::Value> = metrics
        .endpoints
        .iter()
        .map(|(endpoint, metric)| {
            (
                endpoint.clone(),
                json!({
                    "request_count": metric.request_count,
                    "error_count": metric.error_count,
                    "average_duration_ms": metric.average_duration_ms(),
                }),
            )
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
        "engine": ENGINE_NAME,
        "model": {
            "name": state.lifecycle.model_name(),
            "loaded": model_loaded,
            "device": device_label(state.lifecycle.device()),
            "idle_seconds": state.lifecycle.idle_for().as_secs(),
        },
        "metrics": {
            "request_count": metrics.request_count,
            "error_count": metrics.error_count,
            "endpoints": endpoints,
        },
    })))
}
