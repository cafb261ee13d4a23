//! Shared embedding provider traits and data structures.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by embedding adapters.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type shared by adapter implementations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter is misconfigured or missing credentials.
    #[error("adapter not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The supplied request was invalid for the target model.
    #[error("invalid embedding request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Transport-level failures (network, protocol, etc.).
    #[error("adapter transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("adapter rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider returned a malformed response.
    #[error("adapter response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl AdapterError {
    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for malformed responses.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

/// Minimal metadata describing an embedding provider instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterMetadata {
    provider: &'static str,
    model: String,
    dimensions: usize,
}

impl AdapterMetadata {
    /// Creates metadata for the supplied provider, model, and output width.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
        }
    }

    /// Returns the provider identifier (e.g., "openai").
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Returns the configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the number of dimensions each embedding carries.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// One embedding as returned by a provider, tagged with the position of the
/// input it was computed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedEmbedding {
    /// Position of the originating input in the request batch.
    pub index: usize,
    /// Raw embedding values.
    pub values: Vec<f32>,
}

impl IndexedEmbedding {
    /// Creates a new indexed embedding.
    #[must_use]
    pub fn new(index: usize, values: Vec<f32>) -> Self {
        Self { index, values }
    }
}

/// Places provider results into an arena sized to the input batch.
///
/// Providers may answer out of order; the only trusted correlation is the
/// per-item index they return.
///
/// # Errors
///
/// Returns [`AdapterError::Response`] when an index is out of range, appears
/// twice, or when some input position received no embedding.
pub fn order_embeddings(
    expected: usize,
    embeddings: Vec<IndexedEmbedding>,
) -> AdapterResult<Vec<Vec<f32>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];

    for embedding in embeddings {
        let slot = slots.get_mut(embedding.index).ok_or_else(|| {
            AdapterError::response(format!(
                "embedding index {} out of range for batch of {expected}",
                embedding.index
            ))
        })?;
        if slot.is_some() {
            return Err(AdapterError::response(format!(
                "embedding index {} returned more than once",
                embedding.index
            )));
        }
        *slot = Some(embedding.values);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                AdapterError::response(format!("no embedding returned for input {index}"))
            })
        })
        .collect()
}

/// Trait implemented by all embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns basic metadata describing the provider instance.
    fn metadata(&self) -> &AdapterMetadata;

    /// Embeds a batch of texts in one provider call.
    ///
    /// Results carry the index of their input but may arrive in any order.
    async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<IndexedEmbedding>>;

    /// Embeds a batch and returns one vector per input, in input order.
    ///
    /// # Errors
    ///
    /// Propagates provider failures and rejects responses that do not cover
    /// every input exactly once.
    async fn embed_ordered(&self, inputs: &[String]) -> AdapterResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed(inputs).await?;
        order_embeddings(inputs.len(), embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorders_by_provider_index() {
        let ordered = order_embeddings(
            3,
            vec![
                IndexedEmbedding::new(2, vec![2.0]),
                IndexedEmbedding::new(0, vec![0.0]),
                IndexedEmbedding::new(1, vec![1.0]),
            ],
        )
        .unwrap();

        assert_eq!(ordered, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn rejects_missing_positions() {
        let err = order_embeddings(2, vec![IndexedEmbedding::new(0, vec![0.0])])
            .expect_err("second input never embedded");
        assert!(matches!(err, AdapterError::Response { .. }));
    }

    #[test]
    fn rejects_duplicate_and_out_of_range_indices() {
        let err = order_embeddings(
            2,
            vec![
                IndexedEmbedding::new(0, vec![0.0]),
                IndexedEmbedding::new(0, vec![1.0]),
            ],
        )
        .expect_err("duplicate index");
        assert!(matches!(err, AdapterError::Response { .. }));

        let err = order_embeddings(1, vec![IndexedEmbedding::new(5, vec![0.0])])
            .expect_err("out of range");
        assert!(matches!(err, AdapterError::Response { .. }));
    }
}
