//! Core identifier types shared by the memo crates.
//!
//! Every memory belongs to exactly one agent, and every memory owns exactly one
//! point in its agent's vector collection. The newtypes here keep those three
//! identities from being mixed up at call sites.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;

/// Error type and result alias for identifier parsing.
pub use error::{Error, Result};
/// Identifier newtypes and the per-agent collection namespace.
pub use ids::{AgentId, MemoryId, PointId, collection_name};
