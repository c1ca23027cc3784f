//! # Shared Application State
//!
//! State handed to every request handler: configuration, the
//! transcription coordinator, the lifecycle manager (for /health), and
//! request metrics.
//!
//! Everything here is either immutable after startup or guarded by its
//! own lock, so `AppState` clones cheaply into each actix worker.

use crate::config::AppConfig;
use crate::transcription::{ModelLifecycleManager, TranscriptionCoordinator};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub coordinator: Arc<TranscriptionCoordinator>,
    pub lifecycle: Arc<ModelLifecycleManager>,
    metrics: Arc<RwLock<ServiceMetrics>>,
    start_time: Instant,
}

/// Request counters collected by the logging middleware.
#[derive(Debug, Default, Clone)]
pub struct ServiceMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Per-endpoint counters keyed by "METHOD /path".
    pub endpoints: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub error_count: u64,
    pub total_duration_ms: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        coordinator: Arc<TranscriptionCoordinator>,
        lifecycle: Arc<ModelLifecycleManager>,
    ) -> Self {
        Self {
            config,
            coordinator,
            lifecycle,
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Record one completed request. Called by the logging middleware.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let entry = metrics.endpoints.entry(endpoint.to_string()).or_default();
        entry.request_count += 1;
        entry.total_duration_ms += duration_ms;
        if is_error {
            entry.error_count += 1;
        }
    }

    /// Consistent copy of the counters for the health endpoint.
    pub fn metrics_snapshot(&self) -> ServiceMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrectionConfig, ModelConfig, SubtitleConfig};
    use candle_core::Device;

    fn test_state() -> AppState {
        let config = Arc::new(AppConfig::default());
        let lifecycle = Arc::new(ModelLifecycleManager::new(
            ModelConfig {
                name: "base".to_string(),
                path: None,
                device: "cpu".to_string(),
            },
            Device::Cpu,
        ));
        let coordinator = Arc::new(TranscriptionCoordinator::new(
            lifecycle.clone(),
            SubtitleConfig::default(),
            CorrectionConfig::default(),
        ));
        AppState::new(config, coordinator, lifecycle)
    }

    #[test]
    fn test_request_recording() {
        let state = test_state();
        state.record_request("POST /asr", 120, false);
        state.record_request("POST /asr", 80, true);
        state.record_request("GET /status", 2, false);

        let snapshot = state.metrics_snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.error_count, 1);

        let asr = &snapshot.endpoints["POST /asr"];
        assert_eq!(asr.request_count, 2);
        assert_eq!(asr.error_count, 1);
        assert!((asr.average_duration_ms() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_endpoint_average_is_zero() {
        assert_eq!(EndpointMetric::default().average_duration_ms(), 0.0);
    }
}
