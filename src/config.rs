//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::telemetry::SortOrder;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper limit on indexing fetches in flight at once
pub const MAX_CONCURRENT_REQUESTS: usize = 100;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Telemetry collection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Field holding each point's domain (time) value
    #[serde(default = "default_domain_key")]
    pub domain_key: String,

    /// Sort field; the domain key when unset
    #[serde(default)]
    pub sort_field: Option<String>,

    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_domain_key() -> String {
    "utc".to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            domain_key: default_domain_key(),
            sort_field: None,
            sort_order: SortOrder::Ascending,
        }
    }
}

/// Subscription manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Coalescing window in ms; 0 defers the flush to the next scheduler tick
    #[serde(default)]
    pub flush_interval_ms: u64,

    /// Default delivery mode when the caller does not choose one
    #[serde(default)]
    pub lossless: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 0,
            lossless: false,
        }
    }
}

/// Search indexing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// How long a query waits for the worker before failing
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,

    /// Scan budget inside the worker before partial results are returned
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,

    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
}

fn default_max_concurrent_requests() -> usize {
    MAX_CONCURRENT_REQUESTS
}

fn default_query_timeout() -> u64 {
    5000
}

fn default_search_timeout() -> u64 {
    1000
}

fn default_max_results() -> usize {
    100
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            query_timeout_ms: default_query_timeout(),
            search_timeout_ms: default_search_timeout(),
            default_max_results: default_max_results(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("mct").join("config.toml")),
            Some(PathBuf::from("./mct.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("MCT_DOMAIN_KEY") {
            self.collection.domain_key = key;
        }

        if let Ok(ms) = std::env::var("MCT_FLUSH_INTERVAL_MS") {
            if let Ok(ms) = ms.parse() {
                self.subscription.flush_interval_ms = ms;
            }
        }

        if let Ok(n) = std::env::var("MCT_MAX_CONCURRENT_REQUESTS") {
            if let Ok(n) = n.parse() {
                self.search.max_concurrent_requests = n;
            }
        }
        if let Ok(ms) = std::env::var("MCT_QUERY_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.search.query_timeout_ms = ms;
            }
        }

        if let Ok(level) = std::env::var("MCT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MCT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# mct-telemetry Configuration
#
# Environment variables override these settings:
# - MCT_DOMAIN_KEY
# - MCT_FLUSH_INTERVAL_MS
# - MCT_MAX_CONCURRENT_REQUESTS
# - MCT_QUERY_TIMEOUT_MS
# - MCT_LOG_LEVEL
# - MCT_LOG_FORMAT

[collection]
# Field holding the domain (time) value of each point
domain_key = "utc"

# Sort field (defaults to domain_key)
# sort_field = "value.integer"

# ascending or descending
sort_order = "ascending"

[subscription]
# Coalescing window in milliseconds (0 = next scheduler tick)
flush_interval_ms = 0

# Deliver every point (true) or only the latest per source (false)
lossless = false

[search]
# Indexing fetches allowed in flight at once
max_concurrent_requests = 100

# How long a query waits for the search worker (ms)
query_timeout_ms = 5000

# Scan budget inside the worker before partial results are returned (ms)
search_timeout_ms = 1000

# Results returned when the caller does not ask for a number
default_max_results = 100

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
