//! Shared error definitions for memo primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used by the primitive types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing identifiers.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided agent identifier could not be parsed.
    #[error("invalid agent id: {source}")]
    InvalidAgentId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// The provided memory identifier could not be parsed.
    #[error("invalid memory id `{input}`: {reason}")]
    InvalidMemoryId {
        /// The offending input.
        input: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// The provided point identifier could not be parsed.
    #[error("invalid point id `{input}`: {reason}")]
    InvalidPointId {
        /// The offending input.
        input: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}
