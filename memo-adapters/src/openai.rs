//! `OpenAI` embeddings adapter.

use std::{env, fmt, time::Duration};

use async_trait::async_trait;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use hyper::{Body, Request, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::{HyperClient, build_https_client, sanitize_base_url, send};
use crate::traits::{
    AdapterError, AdapterMetadata, AdapterResult, EmbeddingProvider, IndexedEmbedding,
};

/// Environment variable used when loading configuration automatically.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Embedding model used when none is configured.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Output width of [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Configuration for the `OpenAI` embeddings adapter.
#[derive(Clone)]
pub struct OpenAiConfig {
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenAiConfig {
    /// Creates a configuration using the supplied model identifier and its
    /// output width.
    #[must_use]
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            dimensions,
            base_url: "https://api.openai.com/".to_owned(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Loads the API key from the `OPENAI_API_KEY` environment variable.
    #[must_use]
    pub fn from_env(model: impl Into<String>, dimensions: usize) -> Self {
        let mut cfg = Self::new(model, dimensions);
        cfg.api_key = env::var(OPENAI_API_KEY_ENV).ok();
        cfg
    }

    /// Overrides the base URL used for API calls.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref(), "OpenAI")?;
        Ok(self)
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supplies an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

/// `OpenAI` embeddings client calling `/v1/embeddings` over HTTPS.
pub struct OpenAiEmbedder {
    client: HyperClient,
    endpoint: Uri,
    metadata: AdapterMetadata,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.metadata.model())
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Constructs a new adapter with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the API key is missing or the
    /// endpoint cannot be derived from the base URL.
    pub fn new(config: OpenAiConfig) -> AdapterResult<Self> {
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AdapterError::configuration("OpenAI adapter requires an API key"))?;

        let metadata = AdapterMetadata::new("openai", config.model, config.dimensions);
        let endpoint = format!("{}v1/embeddings", config.base_url)
            .parse::<Uri>()
            .map_err(|err| {
                AdapterError::configuration(format!("invalid OpenAI endpoint: {err}"))
            })?;

        Ok(Self {
            client: build_https_client()?,
            endpoint,
            metadata,
            api_key,
            timeout: config.timeout,
        })
    }

    fn build_request<'a>(&'a self, inputs: &'a [String]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: self.metadata.model(),
            input: inputs,
            encoding_format: "float",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<IndexedEmbedding>> {
        if inputs.is_empty() {
            return Err(AdapterError::invalid_request(
                "embedding request requires at least one input",
            ));
        }

        let payload = self.build_request(inputs);
        let body = serde_json::to_vec(&payload).map_err(|err| {
            AdapterError::invalid_request(format!("failed to encode OpenAI request: {err}"))
        })?;

        let request = Request::post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .body(Body::from(body))
            .map_err(|err| {
                AdapterError::transport(format!("failed to build OpenAI request: {err}"))
            })?;

        let response = send(&self.client, request, self.timeout, "OpenAI").await?;

        if response.status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited {
                retry_after: retry_after(&response.headers),
            });
        }

        if !response.status.is_success() {
            return Err(AdapterError::response(format!(
                "OpenAI returned {}: {}",
                response.status,
                response.body_text()
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_slice(&response.body).map_err(|err| {
            AdapterError::response(format!("failed to decode OpenAI response: {err}"))
        })?;

        debug!(
            model = self.metadata.model(),
            inputs = inputs.len(),
            returned = parsed.data.len(),
            "openai embeddings received"
        );

        Ok(parsed
            .data
            .into_iter()
            .map(|item| IndexedEmbedding::new(item.index, item.embedding))
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn base_url_requires_scheme() {
        let err = OpenAiConfig::default()
            .with_base_url("api.openai.com")
            .expect_err("missing scheme should error");

        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[test]
    fn sanitize_allows_trailing_slash() {
        let cfg = OpenAiConfig::default()
            .with_base_url("https://example.com/openai")
            .expect("valid URL");
        assert_eq!(cfg.base_url, "https://example.com/openai/");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = OpenAiEmbedder::new(OpenAiConfig::default()).expect_err("key required");
        assert!(matches!(err, AdapterError::Configuration { .. }));

        let err = OpenAiEmbedder::new(OpenAiConfig::default().with_api_key("  "))
            .expect_err("blank key rejected");
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[test]
    fn request_body_carries_model_and_inputs() {
        let embedder =
            OpenAiEmbedder::new(OpenAiConfig::default().with_api_key("test_key")).unwrap();
        let inputs = vec!["alpha".to_owned(), "beta".to_owned()];
        let body = serde_json::to_value(embedder.build_request(&inputs)).unwrap();

        assert_eq!(body["model"], DEFAULT_EMBEDDING_MODEL);
        assert_eq!(body["input"][1], "beta");
        assert_eq!(body["encoding_format"], "float");
        assert_eq!(embedder.endpoint.path(), "/v1/embeddings");
    }

    #[test]
    fn response_parsing_keeps_provider_indices() {
        let json = r#"{
            "object": "list",
            "data": [
                { "object": "embedding", "index": 1, "embedding": [0.5, 0.5] },
                { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
            ],
            "model": "text-embedding-ada-002"
        }"#;

        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let indices: Vec<usize> = parsed.data.iter().map(|item| item.index).collect();
        assert_eq!(indices, vec![1, 0]);
    }

    #[test]
    fn retry_after_header_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }
}
