//! Configuration for settlement engine

use crate::algorithm::AlgorithmKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Suggestion computation
    pub suggestions: SuggestionConfig,

    /// Suggestion cache
    pub cache: CacheConfig,

    /// Settlement lifecycle
    pub lifecycle: LifecycleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            suggestions: SuggestionConfig::default(),
            cache: CacheConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Suggestion computation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Algorithm used when the caller does not pick one
    pub default_algorithm: AlgorithmKind,

    /// Friend pairs need a weight strictly above this
    pub friend_weight_threshold: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: AlgorithmKind::MinCashFlow,
            friend_weight_threshold: 1.0,
        }
    }
}

/// Suggestion cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache suggestions at all
    pub enabled: bool,

    /// Entry time-to-live in seconds (default: 5 minutes)
    pub ttl_seconds: u64,

    /// Expired-entry sweep interval in seconds (0 disables the sweeper)
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            sweep_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Sweep interval, `None` when disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }
}

/// Settlement lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Compare-and-swap attempts before `ConcurrentModification`
    pub max_cas_retries: u32,

    /// Maximum length of settlement notes in characters
    pub max_notes_length: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: 3,
            max_notes_length: 500,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(algorithm) = std::env::var("SETTLEMENT_DEFAULT_ALGORITHM") {
            config.suggestions.default_algorithm = algorithm.parse()?;
        }

        if let Ok(threshold) = std::env::var("SETTLEMENT_FRIEND_THRESHOLD") {
            config.suggestions.friend_weight_threshold = parse_var(
                "SETTLEMENT_FRIEND_THRESHOLD",
                &threshold,
            )?;
        }

        if let Ok(enabled) = std::env::var("SETTLEMENT_CACHE_ENABLED") {
            config.cache.enabled = parse_var("SETTLEMENT_CACHE_ENABLED", &enabled)?;
        }

        if let Ok(ttl) = std::env::var("SETTLEMENT_CACHE_TTL_SECONDS") {
            config.cache.ttl_seconds = parse_var("SETTLEMENT_CACHE_TTL_SECONDS", &ttl)?;
        }

        if let Ok(interval) = std::env::var("SETTLEMENT_CACHE_SWEEP_SECONDS") {
            config.cache.sweep_interval_seconds =
                parse_var("SETTLEMENT_CACHE_SWEEP_SECONDS", &interval)?;
        }

        if let Ok(retries) = std::env::var("SETTLEMENT_MAX_CAS_RETRIES") {
            config.lifecycle.max_cas_retries = parse_var("SETTLEMENT_MAX_CAS_RETRIES", &retries)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if !self.suggestions.friend_weight_threshold.is_finite() {
            return Err(crate::Error::Config(
                "friend_weight_threshold must be finite".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            return Err(crate::Error::Config(
                "cache.ttl_seconds must be > 0 when the cache is enabled".to_string(),
            ));
        }

        if self.lifecycle.max_cas_retries == 0 {
            return Err(crate::Error::Config(
                "lifecycle.max_cas_retries must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}
