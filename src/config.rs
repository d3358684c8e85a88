//! SDK configuration.
//!
//! Programmatic construction with validation, plus a TOML loader for
//! embeddings that configure from a file.
//!
//! # Required fields
//! - `app_id`, `api_key`, `endpoint` — non-empty strings; construction of
//!   the monitor refuses to proceed without them.
//!
//! Everything else has defaults: features (performance/errors/behavior on,
//! replay off), sampling (1 / 1 / 0.1 / 0.01), reporting (batch 50, flush
//! 5 s, 3 retries, 10 s timeout), privacy (masking on).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::sampler::SamplingRates;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub performance: bool,
    pub errors: bool,
    pub behavior: bool,
    pub replay: bool,
    /// Opt-in mousemove tracking (behavior + replay).
    pub mouse_move: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            performance: true,
            errors: true,
            behavior: true,
            replay: false,
            mouse_move: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
    pub timeout_ms: u64,
    /// First retry delay; doubles per attempt.
    pub retry_base_delay_ms: u64,
    /// Trailing debounce after an error admission.
    pub error_debounce_ms: u64,
    /// Absorbing flush window for non-error admissions.
    pub routine_throttle_ms: u64,
    pub compress: bool,
    /// Performance events with `pageLoadTime` above this always pass
    /// sampling; 0 disables the override.
    pub slow_load_threshold_ms: f64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        ReportingConfig {
            batch_size: 50,
            flush_interval_ms: 5000,
            max_retries: 3,
            timeout_ms: 10_000,
            retry_base_delay_ms: 1000,
            error_debounce_ms: 1000,
            routine_throttle_ms: 5000,
            compress: false,
            slow_load_threshold_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    pub mask_sensitive_data: bool,
    /// When non-empty, only network errors for these hosts are recorded.
    pub allowed_domains: Vec<String>,
    /// Extra selectors masked in replay snapshots.
    pub blocked_elements: Vec<String>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        PrivacyConfig {
            mask_sensitive_data: true,
            allowed_domains: Vec::new(),
            blocked_elements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub app_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub features: Features,
    pub sampling: SamplingRates,
    pub reporting: ReportingConfig,
    pub privacy: PrivacyConfig,
    pub debug: bool,
    pub environment: Option<String>,
    /// Path for the SQLite-backed persistent store; in-memory when unset.
    pub storage_path: Option<PathBuf>,
}

impl MonitorConfig {
    pub fn new(app_id: &str, api_key: &str, endpoint: &str) -> Self {
        MonitorConfig {
            app_id: app_id.to_owned(),
            api_key: api_key.to_owned(),
            endpoint: endpoint.to_owned(),
            features: Features::default(),
            sampling: SamplingRates::default(),
            reporting: ReportingConfig::default(),
            privacy: PrivacyConfig::default(),
            debug: false,
            environment: None,
            storage_path: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("app_id", &self.app_id),
            ("api_key", &self.api_key),
            ("endpoint", &self.endpoint),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_owned()));
            }
        }
        for (name, rate) in [
            ("sampling.performance", self.sampling.performance),
            ("sampling.errors", self.sampling.error),
            ("sampling.behavior", self.sampling.behavior),
            ("sampling.replay", self.sampling.replay),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be in [0, 1], got {rate}"
                )));
            }
        }
        if self.reporting.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "reporting.batch_size must be at least 1".to_owned(),
            ));
        }
        if self.reporting.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "reporting.timeout_ms must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.reporting.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// TOML loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    app_id: Option<String>,
    api_key: Option<String>,
    endpoint: Option<String>,
    debug: Option<bool>,
    environment: Option<String>,
    storage_path: Option<String>,
    features: Option<RawFeatures>,
    sampling: Option<RawSampling>,
    reporting: Option<RawReporting>,
    privacy: Option<RawPrivacy>,
}

#[derive(Debug, Deserialize)]
struct RawFeatures {
    performance: Option<bool>,
    errors: Option<bool>,
    behavior: Option<bool>,
    replay: Option<bool>,
    mouse_move: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawSampling {
    performance: Option<f64>,
    errors: Option<f64>,
    behavior: Option<f64>,
    replay: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawReporting {
    batch_size: Option<usize>,
    flush_interval_ms: Option<u64>,
    max_retries: Option<u32>,
    timeout_ms: Option<u64>,
    retry_base_delay_ms: Option<u64>,
    error_debounce_ms: Option<u64>,
    routine_throttle_ms: Option<u64>,
    compress: Option<bool>,
    slow_load_threshold_ms: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPrivacy {
    mask_sensitive_data: Option<bool>,
    allowed_domains: Option<Vec<String>>,
    blocked_elements: Option<Vec<String>>,
}

/// Load config from a TOML file.
pub fn load_config_from_path(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<MonitorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let app_id = raw
        .app_id
        .ok_or_else(|| ConfigError::MissingField("app_id".to_owned()))?;
    let api_key = raw
        .api_key
        .ok_or_else(|| ConfigError::MissingField("api_key".to_owned()))?;
    let endpoint = raw
        .endpoint
        .ok_or_else(|| ConfigError::MissingField("endpoint".to_owned()))?;

    let mut config = MonitorConfig::new(&app_id, &api_key, &endpoint);
    config.debug = raw.debug.unwrap_or(false);
    config.environment = raw.environment;
    config.storage_path = raw.storage_path.map(PathBuf::from);

    if let Some(f) = raw.features {
        let defaults = Features::default();
        config.features = Features {
            performance: f.performance.unwrap_or(defaults.performance),
            errors: f.errors.unwrap_or(defaults.errors),
            behavior: f.behavior.unwrap_or(defaults.behavior),
            replay: f.replay.unwrap_or(defaults.replay),
            mouse_move: f.mouse_move.unwrap_or(defaults.mouse_move),
        };
    }
    if let Some(s) = raw.sampling {
        let defaults = SamplingRates::default();
        config.sampling = SamplingRates {
            performance: s.performance.unwrap_or(defaults.performance),
            error: s.errors.unwrap_or(defaults.error),
            behavior: s.behavior.unwrap_or(defaults.behavior),
            replay: s.replay.unwrap_or(defaults.replay),
        };
    }
    if let Some(r) = raw.reporting {
        let defaults = ReportingConfig::default();
        config.reporting = ReportingConfig {
            batch_size: r.batch_size.unwrap_or(defaults.batch_size),
            flush_interval_ms: r.flush_interval_ms.unwrap_or(defaults.flush_interval_ms),
            max_retries: r.max_retries.unwrap_or(defaults.max_retries),
            timeout_ms: r.timeout_ms.unwrap_or(defaults.timeout_ms),
            retry_base_delay_ms: r.retry_base_delay_ms.unwrap_or(defaults.retry_base_delay_ms),
            error_debounce_ms: r.error_debounce_ms.unwrap_or(defaults.error_debounce_ms),
            routine_throttle_ms: r.routine_throttle_ms.unwrap_or(defaults.routine_throttle_ms),
            compress: r.compress.unwrap_or(defaults.compress),
            slow_load_threshold_ms: r
                .slow_load_threshold_ms
                .unwrap_or(defaults.slow_load_threshold_ms),
        };
    }
    if let Some(p) = raw.privacy {
        config.privacy = PrivacyConfig {
            mask_sensitive_data: p.mask_sensitive_data.unwrap_or(true),
            allowed_domains: p.allowed_domains.unwrap_or_default(),
            blocked_elements: p.blocked_elements.unwrap_or_default(),
        };
    }

    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
    #[error("config I/O error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_gets_defaults() {
        let config = load_config_from_str(
            r#"
            app_id = "shop"
            api_key = "key-1"
            endpoint = "https://collect.example.com/v1"
            "#,
        )
        .expect("valid config");

        assert!(config.features.errors);
        assert!(!config.features.replay);
        assert_eq!(config.reporting.batch_size, 50);
        assert_eq!(config.sampling.behavior, 0.1);
        assert!(config.privacy.mask_sensitive_data);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = load_config_from_str(r#"app_id = "shop""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(field) if field == "api_key"));
    }

    #[test]
    fn empty_required_field_fails_validation() {
        let config = MonitorConfig::new("", "k", "https://c.example.com");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "app_id"
        ));
    }

    #[test]
    fn sampling_rates_outside_unit_interval_are_rejected() {
        let err = load_config_from_str(
            r#"
            app_id = "shop"
            api_key = "key"
            endpoint = "https://c.example.com"

            [sampling]
            behavior = 1.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn sections_override_defaults() {
        let config = load_config_from_str(
            r#"
            app_id = "shop"
            api_key = "key"
            endpoint = "https://c.example.com"
            environment = "staging"

            [features]
            replay = true

            [reporting]
            batch_size = 10
            compress = true

            [privacy]
            allowed_domains = ["example.com"]
            "#,
        )
        .expect("valid config");

        assert!(config.features.replay);
        assert_eq!(config.reporting.batch_size, 10);
        assert!(config.reporting.compress);
        assert_eq!(config.privacy.allowed_domains, vec!["example.com"]);
        assert_eq!(config.environment.as_deref(), Some("staging"));
    }
}
