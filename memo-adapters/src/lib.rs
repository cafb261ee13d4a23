//! Embedding provider adapters used by the memory engine.
//!
//! Each module exposes an implementation for a specific provider while sharing
//! the [`traits::EmbeddingProvider`] interface. The HTTPS plumbing in
//! [`http_client`] is shared with the vector index gateway.

#![warn(missing_docs, clippy::pedantic)]

pub mod hashing;
pub mod http_client;
pub mod openai;
pub mod traits;
