//! Dual-store memory engine for agents.
//!
//! Memories live in a document store (canonical content) and in a per-agent
//! vector collection (embeddings for semantic search). [`MemoryEngine`]
//! sequences both stores for every operation and reports partially applied
//! states instead of hiding them.

#![warn(missing_docs, clippy::pedantic)]

pub mod document_store;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod locks;
pub mod qdrant;
pub mod reconcile;
pub mod record;
pub mod sqlite;
pub mod vector_index;

pub use document_store::{DocumentStore, LocalDocumentStore};
pub use embeddings::EmbeddingVector;
pub use engine::{EngineConfig, MemoryEngine};
pub use error::{Backend, ErrorKind, MemoryError, MemoryResult};
pub use locks::MutationLocks;
pub use qdrant::{QdrantConfig, QdrantIndex};
pub use reconcile::DriftReport;
pub use record::{Memory, MemoryDraft, MemoryUpdate, SearchResults, UpdateOutcome};
pub use sqlite::SqliteDocumentStore;
pub use vector_index::{LocalVectorIndex, PointRef, ScoredPoint, VectorIndex, VectorPoint};
