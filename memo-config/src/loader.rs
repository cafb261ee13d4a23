//! Loading configuration from TOML files and the environment.

use std::path::Path;

use memo_adapters::openai::OPENAI_API_KEY_ENV;
use tracing::debug;

use crate::{ConfigError, MemoConfig};

/// Overrides the database URL.
pub const DATABASE_URL_ENV: &str = "MEMO_DATABASE_URL";

/// Overrides the Qdrant endpoint.
pub const QDRANT_URL_ENV: &str = "MEMO_QDRANT_URL";

/// Overrides the Qdrant API key.
pub const QDRANT_API_KEY_ENV: &str = "MEMO_QDRANT_API_KEY";

impl MemoConfig {
    /// Parses and validates TOML content.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists (defaults otherwise), applies environment
    /// overrides, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// final configuration is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides obtained through `lookup`. Blank values
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = value(OPENAI_API_KEY_ENV) {
            self.openai_api_key = Some(key);
        }
        if let Some(url) = value(DATABASE_URL_ENV) {
            self.database_url = url;
        }
        if let Some(url) = value(QDRANT_URL_ENV) {
            self.qdrant_url = url;
        }
        if let Some(key) = value(QDRANT_API_KEY_ENV) {
            self.qdrant_api_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_files_fill_in_defaults() {
        let config = MemoConfig::from_toml_str(
            r#"
            memory_list_limit = 30
            qdrant_url = "http://qdrant:6333"
            "#,
        )
        .unwrap();

        assert_eq!(config.memory_list_limit, 30);
        assert_eq!(config.memory_search_limit, 5);
        assert_eq!(config.qdrant_url, "http://qdrant:6333");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = MemoConfig::from_toml_str("qdrant_uri = \"x\"").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (OPENAI_API_KEY_ENV, "sk-test"),
            (DATABASE_URL_ENV, "sqlite::memory:"),
            (QDRANT_URL_ENV, "  "),
        ]);
        let mut config = MemoConfig::default();
        config.apply_overrides(|key| env.get(key).map(|value| (*value).to_owned()));

        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.qdrant_url, MemoConfig::default().qdrant_url);
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = std::env::temp_dir().join(format!("memo-missing-{}.toml", std::process::id()));
        let config = MemoConfig::load(&path).unwrap();
        assert_eq!(config.memory_list_limit, 15);
    }
}
