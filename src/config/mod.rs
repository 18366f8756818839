//! Configuration module for Chunk Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! upload:
//!   chunk_size: 4194304
//!   max_concurrency: 4
//!   validate_content: false
//! logging:
//!   level: "${LOG_LEVEL:-info}"
//!   format: json
//! metrics:
//!   enabled: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
        .expect("static env var pattern is valid");
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
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upload.validate()?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level '{}': must be trace, debug, info, warn or error",
                    other
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'json' or 'pretty'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Bytes per chunk. Default: 4MB
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Maximum chunk uploads in flight. Default: 1
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Smallest chunk size at which seekable sources are uploaded as
    /// sub-streams instead of buffered chunks. Default: 4MB + 1
    #[serde(default = "default_min_large_chunk_upload_threshold")]
    pub min_large_chunk_upload_threshold: u64,

    /// Always buffer chunks in memory, even for seekable sources
    #[serde(default)]
    pub use_byte_buffer: bool,

    /// Ask the service to verify per-chunk content hashes
    #[serde(default)]
    pub validate_content: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            min_large_chunk_upload_threshold: default_min_large_chunk_upload_threshold(),
            use_byte_buffer: false,
            validate_content: false,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.chunk_size must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_chunk_size() -> u64 {
    4194304 // 4MB
}

fn default_max_concurrency() -> usize {
    1
}

fn default_min_large_chunk_upload_threshold() -> u64 {
    4194305 // 4MB + 1
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error. Supports ${VAR} expansion.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "json" or "pretty". Default: "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Print Prometheus metrics after each upload. Default: false
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upload_config() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.min_large_chunk_upload_threshold, 4 * 1024 * 1024 + 1);
    }

    #[test]
    fn test_config_validation_zero_chunk_size() {
        let mut config = Config::default();
        config.upload.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_concurrency() {
        let mut config = Config::default();
        config.upload.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        assert_eq!(
            expand_env_vars("level: ${CHUNK_UPLOADR_UNSET_TEST_VAR:-debug}"),
            "level: debug"
        );
        assert_eq!(expand_env_vars("${CHUNK_UPLOADR_UNSET_TEST_VAR}"), "${CHUNK_UPLOADR_UNSET_TEST_VAR}");
    }
}
