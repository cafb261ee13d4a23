//! Embedding vectors as stored in the vector index.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Backend;
use crate::{MemoryError, MemoryResult};

/// Immutable, validated embedding: non-empty and finite.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidArgument`] when the supplied vector is
    /// empty or contains non-finite values.
    pub fn new(values: Vec<f32>) -> MemoryResult<Self> {
        if values.is_empty() {
            return Err(MemoryError::invalid_argument(
                "embedding vector must not be empty",
            ));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(MemoryError::invalid_argument(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Validates a vector produced by the embedding provider against the
    /// expected width.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Upstream`] attributed to the provider when the
    /// vector is invalid or has the wrong number of dimensions.
    pub fn from_provider(values: Vec<f32>, dimensions: usize) -> MemoryResult<Self> {
        if values.len() != dimensions {
            return Err(MemoryError::upstream(
                Backend::EmbeddingProvider,
                format!(
                    "expected {dimensions}-dimensional embedding, got {}",
                    values.len()
                ),
            ));
        }
        Self::new(values).map_err(|err| {
            MemoryError::upstream(Backend::EmbeddingProvider, err.to_string())
        })
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false`: construction rejects empty vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in `[-1, 1]`; zero when either side has no magnitude.
    #[must_use]
    pub fn cosine(&self, other: &Self) -> f32 {
        let denominator = self.magnitude() * other.magnitude();
        if denominator == 0.0 {
            0.0
        } else {
            self.dot(other) / denominator
        }
    }

    fn dot(&self, other: &Self) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    fn magnitude(&self) -> f32 {
        self.values
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt()
    }
}

impl std::fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_empty_and_non_finite_vectors() {
        let err = EmbeddingVector::new(vec![]).expect_err("empty vector should error");
        assert!(matches!(err, MemoryError::InvalidArgument { .. }));

        let err = EmbeddingVector::new(vec![1.0, f32::NAN]).expect_err("nan not allowed");
        assert!(matches!(err, MemoryError::InvalidArgument { .. }));
    }

    #[test]
    fn provider_vectors_must_match_dimensions() {
        let err = EmbeddingVector::from_provider(vec![1.0, 0.0], 3).expect_err("too short");
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.backend(), Some(Backend::EmbeddingProvider));

        let err = EmbeddingVector::from_provider(vec![f32::INFINITY], 1).expect_err("infinite");
        assert_eq!(err.backend(), Some(Backend::EmbeddingProvider));

        assert_eq!(EmbeddingVector::from_provider(vec![0.5; 3], 3).unwrap().len(), 3);
    }

    #[test]
    fn cosine_handles_zero_magnitude() {
        let unit = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let zero = EmbeddingVector::new(vec![0.0, 0.0]).unwrap();
        assert!((unit.cosine(&unit) - 1.0).abs() < f32::EPSILON);
        assert!(unit.cosine(&zero).abs() < f32::EPSILON);
    }

    #[test]
    fn deserialization_validates() {
        assert!(serde_json::from_str::<EmbeddingVector>("[]").is_err());
        let decoded: EmbeddingVector = serde_json::from_str("[0.1, 0.2]").unwrap();
        assert_eq!(decoded.as_slice(), &[0.1, 0.2]);
    }
}
