//! Strongly typed configuration schema.

use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use memo_adapters::openai::{DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, OpenAiConfig};
use memo_store::qdrant::DEFAULT_QDRANT_URL;
use memo_store::{EngineConfig, QdrantConfig};
use memo_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Deployment configuration. Every key is optional in the file.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MemoConfig {
    /// `OpenAI` API key. Usually supplied through `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,
    /// `OpenAI` API base URL.
    pub openai_base_url: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Output width of the embedding model.
    pub embedding_dimensions: usize,
    /// `sqlx` SQLite URL of the document store.
    pub database_url: String,
    /// Qdrant REST endpoint.
    pub qdrant_url: String,
    /// Qdrant API key, if the instance requires one.
    pub qdrant_api_key: Option<String>,
    /// Page size of memory listings.
    pub memory_list_limit: usize,
    /// Result count of memory searches.
    pub memory_search_limit: usize,
    /// Attempts at deleting vector points before reporting them orphaned.
    pub point_delete_attempts: u32,
    /// Timeout applied to each HTTP request, in seconds.
    pub request_timeout_secs: u64,
    /// Default `tracing` filter directive, used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl std::fmt::Debug for MemoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("MemoConfig")
            .field("openai_api_key", &redacted(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("database_url", &self.database_url)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_api_key", &redacted(&self.qdrant_api_key))
            .field("memory_list_limit", &self.memory_list_limit)
            .field("memory_search_limit", &self.memory_search_limit)
            .field("point_delete_attempts", &self.point_delete_attempts)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("log_filter", &self.log_filter)
            .finish()
    }
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/".to_owned(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_owned(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            database_url: "sqlite://memo.db".to_owned(),
            qdrant_url: DEFAULT_QDRANT_URL.to_owned(),
            qdrant_api_key: None,
            memory_list_limit: 15,
            memory_search_limit: 5,
            point_delete_attempts: 3,
            request_timeout_secs: 60,
            log_filter: "info".to_owned(),
        }
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(value).ok_or_else(|| ConfigError::invalid(field, "must be greater than zero"))
}

impl MemoConfig {
    /// Checks ranges and URL shapes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("embedding_dimensions", self.embedding_dimensions)?;
        non_zero("memory_list_limit", self.memory_list_limit)?;
        non_zero("memory_search_limit", self.memory_search_limit)?;
        if self.point_delete_attempts == 0 {
            return Err(ConfigError::invalid(
                "point_delete_attempts",
                "must be greater than zero",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "request_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::invalid("log_filter", "must not be blank"));
        }
        if !self.database_url.starts_with("sqlite:") {
            return Err(ConfigError::invalid(
                "database_url",
                "must be a sqlite: URL",
            ));
        }
        self.qdrant_config()?;
        OpenAiConfig::default()
            .with_base_url(&self.openai_base_url)
            .map_err(|err| ConfigError::invalid("openai_base_url", err.to_string()))?;
        Ok(())
    }

    /// Timeout applied to each HTTP request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for the memory engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a limit is zero.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let attempts = NonZeroU32::new(self.point_delete_attempts).ok_or_else(|| {
            ConfigError::invalid("point_delete_attempts", "must be greater than zero")
        })?;
        Ok(EngineConfig::new(
            non_zero("memory_list_limit", self.memory_list_limit)?,
            non_zero("memory_search_limit", self.memory_search_limit)?,
        )
        .with_delete_attempts(attempts))
    }

    /// Settings for the `OpenAI` embedder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the base URL is malformed.
    pub fn openai_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let mut config = OpenAiConfig::new(&self.embedding_model, self.embedding_dimensions)
            .with_base_url(&self.openai_base_url)
            .map_err(|err| ConfigError::invalid("openai_base_url", err.to_string()))?
            .with_timeout(self.request_timeout());
        if let Some(key) = &self.openai_api_key {
            config = config.with_api_key(key);
        }
        Ok(config)
    }

    /// Settings for the tracing subscriber.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig::new(&self.log_filter)
    }

    /// Settings for the Qdrant vector index.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the URL is malformed.
    pub fn qdrant_config(&self) -> Result<QdrantConfig, ConfigError> {
        let mut config = QdrantConfig::new(&self.qdrant_url)
            .map_err(|err| ConfigError::invalid("qdrant_url", err.to_string()))?
            .with_timeout(self.request_timeout());
        if let Some(key) = &self.qdrant_api_key {
            config = config.with_api_key(key);
        }
        Ok(config)
    }
}
