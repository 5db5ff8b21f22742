//! Serving configuration.
//!
//! Values come from a TOML file (or defaults), then `VIGIL_*` environment
//! overrides. The binary applies command-line flags last.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use vigil_abstraction::FourCc;

use crate::cache::{CacheConfig, ModelKind};

/// Sweep interval used when idle polling is off.
const FALLBACK_SWEEP_SECS: u64 = 10;

/// Process configuration for the detection service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServingConfig {
    /// Model to serve.
    pub model_name: String,

    /// Backend used to load the model.
    pub model_kind: ModelKind,

    /// Root directory of model artifacts.
    pub model_dir: PathBuf,

    /// Where detection artifacts are written.
    pub results_dir: PathBuf,

    /// Seconds of inactivity before models are unloaded and the idle monitor
    /// shuts the process down. Zero disables both.
    pub model_ttl_secs: u64,

    /// Seconds between idle checks, and between cache sweeps. Zero turns the
    /// idle monitor off while cached models still expire.
    pub model_ttl_poll_secs: u64,

    /// Worker threads for model work. Zero runs work inline.
    pub request_threads: usize,

    /// Optional per-request time limit in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Confidence threshold used when a request does not set one.
    pub default_min_score: f32,

    /// Four-character code of the video encoder.
    pub video_codec: String,
}

fn default_request_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_name: "weapons".to_string(),
            model_kind: ModelKind::ColorRule,
            model_dir: PathBuf::from("models"),
            results_dir: PathBuf::from("results"),
            model_ttl_secs: 300,
            model_ttl_poll_secs: 10,
            request_threads: default_request_threads(),
            request_timeout_secs: None,
            default_min_score: 0.5,
            video_codec: "avc1".to_string(),
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ServingConfig {
    /// Name of the configuration file looked up in the working directory.
    pub const LOCAL_FILE: &'static str = "vigil.toml";

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is missing, unreadable or invalid TOML.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {e}", path.display())))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    /// Load `explicit` if given, else `./vigil.toml` if present, else defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if a selected file cannot be loaded.
    pub fn discover(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        let local = PathBuf::from(Self::LOCAL_FILE);
        if local.is_file() {
            debug!(path = %local.display(), "Using local configuration file");
            return Self::load_from_file(&local);
        }
        Ok(Self::default())
    }

    /// Apply `VIGIL_*` overrides from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply `VIGIL_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(value) = lookup("VIGIL_MODEL_NAME") {
            self.model_name = value;
        }
        if let Some(value) = lookup("VIGIL_MODEL_KIND") {
            self.model_kind = value.parse().map_err(ConfigError::InvalidValue)?;
        }
        if let Some(value) = lookup("VIGIL_MODEL_DIR") {
            self.model_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("VIGIL_RESULTS_DIR") {
            self.results_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("VIGIL_MODEL_TTL") {
            self.model_ttl_secs = parse_var("VIGIL_MODEL_TTL", &value)?;
        }
        if let Some(value) = lookup("VIGIL_MODEL_TTL_POLL_S") {
            self.model_ttl_poll_secs = parse_var("VIGIL_MODEL_TTL_POLL_S", &value)?;
        }
        if let Some(value) = lookup("VIGIL_REQUEST_THREADS") {
            self.request_threads = parse_var("VIGIL_REQUEST_THREADS", &value)?;
        }
        if let Some(value) = lookup("VIGIL_REQUEST_TIMEOUT_S") {
            self.request_timeout_secs = Some(parse_var("VIGIL_REQUEST_TIMEOUT_S", &value)?);
        }
        if let Some(value) = lookup("VIGIL_DEFAULT_MIN_SCORE") {
            self.default_min_score = parse_var("VIGIL_DEFAULT_MIN_SCORE", &value)?;
        }
        if let Some(value) = lookup("VIGIL_VIDEO_CODEC") {
            self.video_codec = value;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for the first invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.model_name.is_empty() {
            return Err(ConfigError::InvalidValue("model_name must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.default_min_score) {
            return Err(ConfigError::InvalidValue(format!(
                "default_min_score must be within [0, 1], got {}",
                self.default_min_score
            )));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue("request_timeout_secs must be positive".to_string()));
        }
        self.video_fourcc()?;
        self.cache_config()
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Ok(())
    }

    /// Cache settings derived from the TTL fields.
    #[must_use]
    pub const fn cache_config(&self) -> CacheConfig {
        let sweep_interval_secs =
            if self.model_ttl_poll_secs > 0 { self.model_ttl_poll_secs } else { FALLBACK_SWEEP_SECS };
        CacheConfig { ttl_secs: self.model_ttl_secs, sweep_interval_secs }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Parsed video codec tag.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if `video_codec` is not four ASCII
    /// characters.
    pub fn video_fourcc(&self) -> ConfigResult<FourCc> {
        FourCc::parse(&self.video_codec).ok_or_else(|| {
            ConfigError::InvalidValue(format!("video_codec must be four ASCII characters, got '{}'", self.video_codec))
        })
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    /// Returns `ConfigError::ParseError` if serialization fails.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {e}")))
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model_ttl_secs, 300);
        assert_eq!(config.model_ttl_poll_secs, 10);
        assert!((config.default_min_score - 0.5).abs() < f32::EPSILON);
        assert!(config.request_threads >= 1);
        assert_eq!(config.cache_config().ttl_secs, 300);
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vigil.toml");
        std::fs::write(
            &path,
            "model_name = \"guns\"\nmodel_kind = \"mock\"\nmodel_ttl_secs = 0\nrequest_threads = 0\n",
        )
        .unwrap();

        let config = ServingConfig::load_from_file(&path).unwrap();
        assert_eq!(config.model_name, "guns");
        assert_eq!(config.model_kind, ModelKind::Mock);
        assert_eq!(config.model_ttl_secs, 0);
        assert_eq!(config.request_threads, 0);
        assert_eq!(config.video_codec, "avc1");
        assert!(!config.cache_config().eviction_enabled());
    }

    #[test]
    fn test_load_errors() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.toml");
        assert!(matches!(ServingConfig::load_from_file(&missing), Err(ConfigError::NotFound(_))));

        let bad = temp.path().join("bad.toml");
        std::fs::write(&bad, "unknown_key = 1\n").unwrap();
        assert!(matches!(ServingConfig::load_from_file(&bad), Err(ConfigError::ParseError(_))));

        assert!(matches!(ServingConfig::discover(Some(&missing)), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VIGIL_MODEL_TTL", "5"),
            ("VIGIL_MODEL_TTL_POLL_S", "1"),
            ("VIGIL_REQUEST_THREADS", "0"),
            ("VIGIL_RESULTS_DIR", "/ml-results"),
            ("VIGIL_MODEL_KIND", "mock"),
            ("VIGIL_DEFAULT_MIN_SCORE", "0.2"),
        ]
        .into_iter()
        .collect();

        let mut config = ServingConfig::default();
        config.apply_env_with(|name| vars.get(name).map(ToString::to_string)).unwrap();

        assert_eq!(config.model_ttl_secs, 5);
        assert_eq!(config.model_ttl_poll_secs, 1);
        assert_eq!(config.request_threads, 0);
        assert_eq!(config.results_dir, PathBuf::from("/ml-results"));
        assert_eq!(config.model_kind, ModelKind::Mock);
        assert!((config.default_min_score - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ServingConfig::default();
        let err = config
            .apply_env_with(|name| (name == "VIGIL_MODEL_TTL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServingConfig { default_min_score: 1.5, ..ServingConfig::default() };
        assert!(config.validate().is_err());

        config = ServingConfig { video_codec: "h264x".into(), ..ServingConfig::default() };
        assert!(config.validate().is_err());

        config = ServingConfig { model_ttl_secs: 0, model_ttl_poll_secs: 0, ..ServingConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_eviction_without_idle_polling() {
        let config = ServingConfig { model_ttl_secs: 300, model_ttl_poll_secs: 0, ..ServingConfig::default() };
        assert!(config.validate().is_ok());

        let cache = config.cache_config();
        assert_eq!(cache.ttl_secs, 300);
        assert_eq!(cache.sweep_interval_secs, FALLBACK_SWEEP_SECS);

        let polled = ServingConfig { model_ttl_poll_secs: 3, ..config };
        assert_eq!(polled.cache_config().sweep_interval_secs, 3);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ServingConfig { request_timeout_secs: Some(30), ..ServingConfig::default() };
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("model_ttl_secs = 300"));
        let parsed: ServingConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
