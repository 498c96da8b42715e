//! Configuration module
//!
//! Handles loading and parsing of YAML configuration files with support
//! for environment variable expansion and validation. Engine tunables can
//! also be built programmatically via [`UploadConfig`]'s defaults.

use crate::multipart::{DEFAULT_CONCURRENT_UPLOADS, DEFAULT_PART_SIZE, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - expansion with default value
fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = cap.get(2) {
                    default.as_str().to_string()
                } else {
                    // no env var and no default, keep the placeholder
                    full_match.as_str().to_string()
                }
            }
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Custom deserializer applying environment variable expansion.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

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
    pub service: ServiceConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.service.base_url) {
            return Err(ConfigError::ValidationError(
                "Invalid base_url: must start with http:// or https://".into(),
            ));
        }

        if self.service.token.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Service token cannot be empty".into(),
            ));
        }

        if self.service.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.upload.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "part_size {} is below the service minimum of {} bytes",
                self.upload.part_size, MIN_PART_SIZE
            )));
        }

        if self.upload.max_concurrent_uploads == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_uploads must be at least 1".into(),
            ));
        }

        if self.upload.memory_headroom == 0 {
            return Err(ConfigError::ValidationError(
                "memory_headroom must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Blob service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service API endpoint, e.g. `https://blob.example.com/api`
    #[serde(deserialize_with = "deserialize_with_env")]
    pub base_url: String,

    /// Bearer token. Supports `${VAR}` and `${VAR:-default}` expansion so
    /// secrets stay out of the config file.
    #[serde(deserialize_with = "deserialize_with_env")]
    pub token: String,

    /// Per-request timeout; no timeout when absent
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient service failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// Multipart engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Size of each uploaded part; the final part may be smaller
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Upper bound on simultaneously in-flight part uploads
    #[serde(default = "default_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Headroom factor for the memory bound: the engine may buffer
    /// `max_concurrent_uploads * part_size * memory_headroom` bytes
    #[serde(default = "default_memory_headroom")]
    pub memory_headroom: usize,
}

impl UploadConfig {
    /// Maximum bytes of payload the engine holds in memory at once.
    pub fn max_bytes_in_memory(&self) -> usize {
        self.max_concurrent_uploads
            .saturating_mul(self.part_size)
            .saturating_mul(self.memory_headroom)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            max_concurrent_uploads: default_concurrent_uploads(),
            memory_headroom: default_memory_headroom(),
        }
    }
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_concurrent_uploads() -> usize {
    DEFAULT_CONCURRENT_UPLOADS
}

fn default_memory_headroom() -> usize {
    2
}
