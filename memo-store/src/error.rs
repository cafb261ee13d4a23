//! Error types for the memory engine and its gateways.

use std::fmt;

use memo_adapters::traits::AdapterError;
use memo_primitives::{MemoryId, PointId};
use serde::Serialize;
use thiserror::Error;

/// External collaborator a failure originated from.
///
/// Recovery differs per collaborator: a document store failure usually means
/// nothing was written, while a vector index failure after a document write
/// leaves drift behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// The canonical record store.
    DocumentStore,
    /// The per-agent vector collections.
    VectorIndex,
    /// The text-to-vector provider.
    EmbeddingProvider,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DocumentStore => "document store",
            Self::VectorIndex => "vector index",
            Self::EmbeddingProvider => "embedding provider",
        })
    }
}

/// Stable classification of a [`MemoryError`], suitable for mapping to
/// transport-level status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller supplied input that must be rejected before any store call.
    InvalidArgument,
    /// The entity is absent or owned by a different agent.
    NotFound,
    /// A write was acknowledged for fewer items than requested, or only some
    /// of the stores were written.
    PartialWrite,
    /// A read resolved fewer items than requested.
    PartialResult,
    /// A collaborator returned an error.
    Upstream,
}

/// Errors emitted by memory components.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Caller input failed validation.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable reason describing the rejection.
        reason: String,
    },

    /// The engine was assembled with an invalid configuration.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(&'static str),

    /// The requested memory does not exist for the scoping agent.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// An update matched no document or left every document unchanged.
    #[error("no memories were modified")]
    NotModified,

    /// A bulk write acknowledged fewer items than requested.
    #[error("partial write: {acknowledged} of {expected} writes acknowledged")]
    PartialWrite {
        /// Number of items submitted.
        expected: usize,
        /// Number of items the store acknowledged.
        acknowledged: usize,
    },

    /// A bulk read resolved fewer items than requested.
    #[error("partial result: resolved {resolved} of {expected} memories")]
    PartialResult {
        /// Number of items requested.
        expected: usize,
        /// Number of items resolved.
        resolved: usize,
    },

    /// A collaborator reported a failure.
    #[error("{backend} failure: {reason}")]
    Upstream {
        /// Which collaborator failed.
        backend: Backend,
        /// Human-readable reason describing the failure.
        reason: String,
    },

    /// Documents were persisted but their vectors were not written.
    ///
    /// The memories are visible through get and list but not searchable until
    /// [`MemoryEngine::reindex`](crate::MemoryEngine::reindex) succeeds for `ids`.
    #[error("{count} memories persisted without vectors: {source}", count = .ids.len())]
    VectorsMissing {
        /// Memories whose documents exist without an up-to-date point.
        ids: Vec<MemoryId>,
        /// The embedding or vector index failure.
        source: Box<MemoryError>,
    },

    /// Documents were deleted but their vector points were not.
    #[error("{count} vector points orphaned: {source}", count = .point_ids.len())]
    OrphanedPoints {
        /// Points that remain in the vector index without a document.
        point_ids: Vec<PointId>,
        /// The vector index failure.
        source: Box<MemoryError>,
    },
}

impl MemoryError {
    /// Helper to construct invalid-argument errors from string-like values.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Helper to construct not-found errors from string-like values.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Helper to construct collaborator errors from string-like values.
    #[must_use]
    pub fn upstream(backend: Backend, reason: impl Into<String>) -> Self {
        Self::Upstream {
            backend,
            reason: reason.into(),
        }
    }

    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidConfig(_) => ErrorKind::InvalidArgument,
            Self::NotFound { .. } | Self::NotModified => ErrorKind::NotFound,
            Self::PartialWrite { .. } | Self::VectorsMissing { .. } | Self::OrphanedPoints { .. } => {
                ErrorKind::PartialWrite
            }
            Self::PartialResult { .. } => ErrorKind::PartialResult,
            Self::Upstream { .. } => ErrorKind::Upstream,
        }
    }

    /// Returns the collaborator at fault, looking through partially applied
    /// states to their cause.
    #[must_use]
    pub fn backend(&self) -> Option<Backend> {
        match self {
            Self::Upstream { backend, .. } => Some(*backend),
            Self::VectorsMissing { source, .. } | Self::OrphanedPoints { source, .. } => {
                source.backend()
            }
            _ => None,
        }
    }

    /// Whether the error leaves the document store and the vector index
    /// disagreeing about which memories exist.
    #[must_use]
    pub fn is_drift(&self) -> bool {
        matches!(self, Self::VectorsMissing { .. } | Self::OrphanedPoints { .. })
    }
}

impl From<AdapterError> for MemoryError {
    fn from(err: AdapterError) -> Self {
        Self::upstream(Backend::EmbeddingProvider, err.to_string())
    }
}

impl From<memo_primitives::Error> for MemoryError {
    fn from(err: memo_primitives::Error) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partially_applied_states_report_their_cause() {
        let err = MemoryError::VectorsMissing {
            ids: vec![MemoryId::generate()],
            source: Box::new(MemoryError::upstream(Backend::VectorIndex, "connection reset")),
        };

        assert_eq!(err.kind(), ErrorKind::PartialWrite);
        assert_eq!(err.backend(), Some(Backend::VectorIndex));
        assert!(err.is_drift());
        assert_eq!(
            err.to_string(),
            "1 memories persisted without vectors: vector index failure: connection reset"
        );
    }

    #[test]
    fn adapter_errors_are_attributed_to_the_provider() {
        let err = MemoryError::from(AdapterError::transport("dns failure"));
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.backend(), Some(Backend::EmbeddingProvider));
    }

    #[test]
    fn not_modified_classifies_as_not_found() {
        assert_eq!(MemoryError::NotModified.kind(), ErrorKind::NotFound);
        assert!(!MemoryError::NotModified.is_drift());
    }
}
