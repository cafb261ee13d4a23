//! Deterministic local embedder based on feature hashing.
//!
//! Texts sharing words land near each other, which is enough to exercise the
//! search path without a network provider. Not a semantic model.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::traits::{AdapterMetadata, AdapterResult, EmbeddingProvider, IndexedEmbedding};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bag-of-words embedder hashing lowercase tokens into a fixed number of buckets.
#[derive(Debug)]
pub struct HashingEmbedder {
    metadata: AdapterMetadata,
    reverse_responses: bool,
    calls: AtomicUsize,
    embedded_inputs: AtomicUsize,
}

impl HashingEmbedder {
    /// Creates an embedder producing vectors of the given width.
    #[must_use]
    pub fn new(dimensions: NonZeroUsize) -> Self {
        Self {
            metadata: AdapterMetadata::new("hashing", "fnv-bag-of-words", dimensions.get()),
            reverse_responses: false,
            calls: AtomicUsize::new(0),
            embedded_inputs: AtomicUsize::new(0),
        }
    }

    /// Returns results in reverse input order, like a provider that answers
    /// out of order. Indices stay correct.
    #[must_use]
    pub fn with_reversed_responses(mut self) -> Self {
        self.reverse_responses = true;
        self
    }

    /// Number of batch calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of individual texts embedded so far.
    #[must_use]
    pub fn embedded_inputs(&self) -> usize {
        self.embedded_inputs.load(Ordering::SeqCst)
    }

    /// Embeds a single text. The result is L2-normalised.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dimensions = self.metadata.dimensions();
        let mut values = vec![0.0_f32; dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let bucket = usize::try_from(fnv1a(&token.to_lowercase()) % dimensions as u64)
                .unwrap_or_default();
            values[bucket] += 1.0;
        }

        let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm == 0.0 {
            values[0] = 1.0;
        } else {
            for value in &mut values {
                *value /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<IndexedEmbedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.embedded_inputs.fetch_add(inputs.len(), Ordering::SeqCst);

        let mut embeddings: Vec<IndexedEmbedding> = inputs
            .iter()
            .enumerate()
            .map(|(index, text)| IndexedEmbedding::new(index, self.embed_text(text)))
            .collect();
        if self.reverse_responses {
            embeddings.reverse();
        }
        Ok(embeddings)
    }
}

fn fnv1a(input: &str) -> u64 {
    input.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(lhs: &[f32], rhs: &[f32]) -> f32 {
        lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
    }

    fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(NonZeroUsize::new(64).unwrap())
    }

    #[test]
    fn shared_words_score_higher() {
        let embedder = embedder();
        let query = embedder.embed_text("favorite video game");
        let close = embedder.embed_text("My favorite video game is Last of Us");
        let far = embedder.embed_text("My father is a teacher");

        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn embedding_is_case_insensitive_and_normalised() {
        let embedder = embedder();
        let lower = embedder.embed_text("pizza night");
        let upper = embedder.embed_text("PIZZA Night");
        assert_eq!(lower, upper);

        let norm: f32 = lower.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_still_yields_unit_vector() {
        let values = embedder().embed_text("  ...  ");
        assert_eq!(values[0], 1.0);
        assert_eq!(values.iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[tokio::test]
    async fn reversed_responses_keep_indices() {
        let embedder = embedder().with_reversed_responses();
        let inputs = vec!["one".to_owned(), "two".to_owned(), "three".to_owned()];

        let raw = embedder.embed(&inputs).await.unwrap();
        assert_eq!(raw[0].index, 2);

        let ordered = embedder.embed_ordered(&inputs).await.unwrap();
        assert_eq!(ordered[0], embedder.embed_text("one"));
        assert_eq!(ordered[2], embedder.embed_text("three"));
        assert_eq!(embedder.calls(), 2);
        assert_eq!(embedder.embedded_inputs(), 6);
    }
}
