//! Configuration loader

use super::{Config, ConfigError};
use std::path::Path;

/// Loads and validates YAML configuration files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file.
    ///
    /// Field-level `${VAR}` expansion happens during deserialization, so
    /// secrets referenced from the YAML are resolved here.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "service:\n  base_url: https://blob.example.com/api\n  token: test-token"
        )
        .unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.service.base_url, "https://blob.example.com/api");
        // engine tunables fall back to defaults
        assert_eq!(config.upload.max_concurrent_uploads, 8);
    }

    #[test]
    fn test_load_expands_token_from_env() {
        std::env::set_var("BLOBPART_TEST_TOKEN", "from-env");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "service:\n  base_url: https://blob.example.com/api\n  token: ${{BLOBPART_TEST_TOKEN}}"
        )
        .unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.service.token, "from-env");

        std::env::remove_var("BLOBPART_TEST_TOKEN");
    }

    #[test]
    fn test_load_rejects_invalid_part_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "service:\n  base_url: https://blob.example.com/api\n  token: t\nupload:\n  part_size: 100"
        )
        .unwrap();

        assert!(matches!(
            ConfigLoader::load(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
