//! Configuration for model caching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration for the model cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Seconds before an unused model is evicted. Zero disables eviction.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the sweeper runs, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval_secs() -> u64 {
    10
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Eviction is enabled but the sweeper would never run.
    #[error("Invalid sweep interval: must be greater than 0 when ttl is enabled")]
    InvalidSweepInterval,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// A configuration that never evicts.
    #[must_use]
    pub const fn without_eviction() -> Self {
        Self { ttl_secs: 0, sweep_interval_secs: 0 }
    }

    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.ttl_secs > 0 && self.sweep_interval_secs == 0 {
            return Err(CacheConfigError::InvalidSweepInterval);
        }
        Ok(())
    }

    /// Whether idle entries are ever evicted.
    #[must_use]
    pub const fn eviction_enabled(&self) -> bool {
        self.ttl_secs > 0
    }

    /// Idle time after which an entry is evicted, if eviction is enabled.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.eviction_enabled().then(|| Duration::from_secs(self.ttl_secs))
    }

    /// Get the sweep interval as a Duration.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_secs, 300);
        assert_eq!(config.sweep_interval_secs, 10);
        assert_eq!(config.ttl(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_disables_eviction() {
        let config = CacheConfig::without_eviction();
        assert!(!config.eviction_enabled());
        assert_eq!(config.ttl(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_with_ttl_is_invalid() {
        let config = CacheConfig { ttl_secs: 60, sweep_interval_secs: 0 };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidSweepInterval));
    }

    #[test]
    fn test_cache_config_from_toml_uses_defaults() {
        let config: CacheConfig = toml::from_str("ttl_secs = 5").unwrap();
        assert_eq!(config.ttl_secs, 5);
        assert_eq!(config.sweep_interval(), Duration::from_secs(10));
    }
}
