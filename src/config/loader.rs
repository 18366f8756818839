//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` and
    /// `${VAR:-default}` first
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applies_defaults() {
        let config = ConfigLoader::parse("upload:\n  max_concurrency: 3\n").unwrap();
        assert_eq!(config.upload.max_concurrency, 3);
        assert_eq!(config.upload.chunk_size, 4194304);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        let result = ConfigLoader::parse("upload:\n  chunk_size: 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
