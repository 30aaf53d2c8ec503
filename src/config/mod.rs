//! Configuration module for ctlog-s3
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Endpoint whose stores honour `If-Match: ""` as "create only"
pub const TIGRIS_ENDPOINT: &str = "https://fly.storage.tigris.dev";

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_BUCKET", "tiles");
/// assert_eq!(expand_env_vars("${MY_BUCKET}"), "tiles");
/// assert_eq!(expand_env_vars("${MISSING:-log/}"), "log/");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

fn deserialize_option_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| expand_env_vars(&s)))
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub s3: S3Config,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.s3.validate()
    }
}

/// S3 backend configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(deserialize_with = "deserialize_with_env")]
    pub region: String,

    #[serde(deserialize_with = "deserialize_with_env")]
    pub bucket: String,

    /// Base URL override for S3-compatible stores
    #[serde(default, deserialize_with = "deserialize_option_with_env")]
    pub endpoint: Option<String>,

    /// Prepended to every key; may be empty
    #[serde(default, deserialize_with = "deserialize_with_env")]
    pub key_prefix: String,

    #[serde(default, deserialize_with = "deserialize_option_with_env")]
    pub access_key: Option<String>,

    #[serde(default, deserialize_with = "deserialize_option_with_env")]
    pub secret_key: Option<String>,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    #[serde(default)]
    pub force_path_style: bool,

    /// Send `If-Match: ""` on immutable writes. Auto-detected from the
    /// endpoint when unset.
    #[serde(default)]
    pub conditional_writes: Option<bool>,

    #[serde(default = "default_hedge_delay_ms")]
    pub hedge_delay_ms: u64,

    /// Upper bound of the retryer's exponential backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Total attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("key_prefix", &self.key_prefix)
            .field("access_key", &self.access_key)
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("conditional_writes", &self.conditional_writes)
            .field("hedge_delay_ms", &self.hedge_delay_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

fn default_hedge_delay_ms() -> u64 {
    75
}

fn default_max_backoff_ms() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

impl S3Config {
    /// Minimal configuration with defaults for everything optional
    pub fn new(region: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            endpoint: None,
            key_prefix: String::new(),
            access_key: None,
            secret_key: None,
            force_path_style: false,
            conditional_writes: None,
            hedge_delay_ms: default_hedge_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("region cannot be empty".into()));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError("bucket cannot be empty".into()));
        }
        if let Some(ref endpoint) = self.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }
        if self.hedge_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "hedge_delay_ms must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether immutable writes carry the create-only precondition
    pub fn uses_conditional_writes(&self) -> bool {
        self.conditional_writes
            .unwrap_or_else(|| self.endpoint.as_deref() == Some(TIGRIS_ENDPOINT))
    }

    pub fn hedge_delay(&self) -> Duration {
        Duration::from_millis(self.hedge_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Logging configuration for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
