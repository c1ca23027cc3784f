//! # Configuration Management
//!
//! Loads process-wide configuration from layered sources and validates it
//! once at startup. The configuration is read-only afterwards: handlers and
//! background tasks receive it behind an `Arc`, never behind a lock.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_MODEL__NAME, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are honoured without the prefix for deployment
//! platforms that inject them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Process-wide application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub subtitle: SubtitleConfig,
    pub correction: CorrectionConfig,
    pub idle: IdleConfig,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Acoustic model selection and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Whisper variant to load ("tiny", "base", "small", "medium", "large").
    pub name: String,

    /// Directory for cached model weights. None = hf-hub default cache.
    pub path: Option<String>,

    /// Device preference: "auto", "cpu", "cuda" or "metal".
    pub device: String,
}

/// Subtitle rendering limits shared by the SRT and VTT renderers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// Maximum characters per rendered line. 0 = unlimited.
    pub max_line_width: usize,

    /// Maximum lines per cue. 0 = unlimited.
    pub max_line_count: usize,

    /// Emit one cue per word with the active word underlined
    /// (requires word-level timestamps in the result).
    pub highlight_words: bool,
}

/// Language-specific timing correction parameters.
///
/// The correction runs only when `enabled` is true AND the detected
/// language of a result equals `language`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    pub enabled: bool,

    /// Target language code the correction applies to.
    pub language: String,

    /// Fixed offset added to every segment and word timestamp, in
    /// milliseconds. May be negative; starts are floored at zero.
    pub offset_ms: i64,

    /// Minimum gap between adjacent segments, in milliseconds. Segments
    /// closer than this are pushed apart during post-processing.
    pub min_gap_ms: u64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            language: "es".to_string(),
            offset_ms: 0,
            min_gap_ms: 500,
        }
    }
}

/// Idle eviction of the loaded model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Unload the model after this many seconds without a request.
    /// 0 disables eviction entirely.
    pub timeout_secs: u64,

    /// How often the evictor wakes up to check.
    pub check_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9000,
            },
            model: ModelConfig {
                name: "base".to_string(),
                path: None,
                device: "auto".to_string(),
            },
            subtitle: SubtitleConfig::default(),
            correction: CorrectionConfig::default(),
            idle: IdleConfig {
                timeout_secs: 300,
                check_interval_secs: 30,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Deployment platforms commonly inject bare HOST/PORT variables.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration values once at startup.
    ///
    /// Correction parameters and thresholds are checked here so that a bad
    /// deployment fails immediately instead of corrupting per-request
    /// timing output later.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.name.trim().is_empty() {
            return Err(anyhow::anyhow!("Model name cannot be empty"));
        }

        if self.idle.check_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Idle check interval must be greater than 0"
            ));
        }

        if self.correction.offset_ms.abs() > 5_000 {
            return Err(anyhow::anyhow!(
                "Correction offset out of range: {}ms (limit: +/-5000ms)",
                self.correction.offset_ms
            ));
        }

        if self.correction.min_gap_ms > 10_000 {
            return Err(anyhow::anyhow!(
                "Minimum segment gap out of range: {}ms (limit: 10000ms)",
                self.correction.min_gap_ms
            ));
        }

        if self.correction.enabled && self.correction.language.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Correction is enabled but no target language is set"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.model.name, "base");
        assert!(!config.correction.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_model_name() {
        let mut config = AppConfig::default();
        config.model.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_correction() {
        let mut config = AppConfig::default();
        config.correction.offset_ms = 6_000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.correction.offset_ms = -6_000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.correction.min_gap_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_enabled_correction_without_language() {
        let mut config = AppConfig::default();
        config.correction.enabled = true;
        config.correction.language = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_check_interval() {
        let mut config = AppConfig::default();
        config.idle.check_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
