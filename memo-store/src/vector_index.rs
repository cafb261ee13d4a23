//! Vector index gateway and a local in-memory implementation.
//!
//! The index is partitioned into one collection per agent. Implementations
//! derive the collection from the agent id with
//! [`collection_name`](memo_primitives::collection_name) at their call boundary;
//! callers only ever pass the agent id.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use async_trait::async_trait;
use memo_primitives::{AgentId, MemoryId, PointId, collection_name};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::embeddings::EmbeddingVector;
use crate::error::Backend;
use crate::{MemoryError, MemoryResult};

/// Point stored in an agent's collection: the memory's embedding plus the
/// memory id as payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    id: PointId,
    vector: EmbeddingVector,
    memory_id: MemoryId,
}

impl VectorPoint {
    /// Creates a new point.
    #[must_use]
    pub fn new(id: PointId, vector: EmbeddingVector, memory_id: MemoryId) -> Self {
        Self {
            id,
            vector,
            memory_id,
        }
    }

    /// Returns the point identifier.
    #[must_use]
    pub fn id(&self) -> PointId {
        self.id
    }

    /// Returns the embedding.
    #[must_use]
    pub fn vector(&self) -> &EmbeddingVector {
        &self.vector
    }

    /// Returns the memory this point indexes.
    #[must_use]
    pub fn memory_id(&self) -> MemoryId {
        self.memory_id
    }
}

/// Point identity and payload, without the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointRef {
    /// Point identifier.
    pub point_id: PointId,
    /// Memory id carried in the point payload.
    pub memory_id: MemoryId,
}

/// Nearest-neighbour match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    /// Point identifier.
    pub point_id: PointId,
    /// Memory id carried in the point payload.
    pub memory_id: MemoryId,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Per-agent vector collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the agent's collection with cosine distance. Succeeds if the
    /// collection already exists.
    async fn create_collection(&self, agent: AgentId, dimensions: usize) -> MemoryResult<()>;

    /// Drops the agent's collection and every point in it. Succeeds if the
    /// collection does not exist.
    async fn drop_collection(&self, agent: AgentId) -> MemoryResult<()>;

    /// Inserts or replaces points in one call and returns once they are
    /// visible to search.
    async fn upsert(&self, agent: AgentId, points: Vec<VectorPoint>) -> MemoryResult<()>;

    /// Deletes points by id in one call. Unknown ids are ignored.
    async fn delete(&self, agent: AgentId, ids: &[PointId]) -> MemoryResult<()>;

    /// Returns up to `limit` points most similar to `vector`, best first.
    async fn search(
        &self,
        agent: AgentId,
        vector: &EmbeddingVector,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<ScoredPoint>>;

    /// Returns every point in the agent's collection.
    async fn points(&self, agent: AgentId) -> MemoryResult<Vec<PointRef>>;
}

#[derive(Debug)]
struct Collection {
    dimensions: usize,
    points: HashMap<PointId, VectorPoint>,
}

/// In-memory vector index scoring by exact cosine similarity.
#[derive(Debug, Default)]
pub struct LocalVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl LocalVectorIndex {
    /// Creates an index with no collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the agent's collection exists.
    pub async fn has_collection(&self, agent: AgentId) -> bool {
        self.collections
            .read()
            .await
            .contains_key(&collection_name(agent))
    }

    /// Number of points in the agent's collection, zero when it is absent.
    pub async fn point_count(&self, agent: AgentId) -> usize {
        self.collections
            .read()
            .await
            .get(&collection_name(agent))
            .map_or(0, |collection| collection.points.len())
    }
}

fn missing_collection(name: &str) -> MemoryError {
    MemoryError::upstream(
        Backend::VectorIndex,
        format!("collection {name} does not exist"),
    )
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn create_collection(&self, agent: AgentId, dimensions: usize) -> MemoryResult<()> {
        if dimensions == 0 {
            return Err(MemoryError::invalid_argument(
                "collection dimensions must be non-zero",
            ));
        }
        let name = collection_name(agent);
        let mut guard = self.collections.write().await;
        let collection = guard.entry(name.clone()).or_insert_with(|| Collection {
            dimensions,
            points: HashMap::new(),
        });
        if collection.dimensions != dimensions {
            return Err(MemoryError::upstream(
                Backend::VectorIndex,
                format!(
                    "collection {name} has vector size {}, expected {dimensions}",
                    collection.dimensions
                ),
            ));
        }
        Ok(())
    }

    async fn drop_collection(&self, agent: AgentId) -> MemoryResult<()> {
        self.collections
            .write()
            .await
            .remove(&collection_name(agent));
        Ok(())
    }

    async fn upsert(&self, agent: AgentId, points: Vec<VectorPoint>) -> MemoryResult<()> {
        let name = collection_name(agent);
        let mut guard = self.collections.write().await;
        let collection = guard
            .get_mut(&name)
            .ok_or_else(|| missing_collection(&name))?;

        if let Some(point) = points
            .iter()
            .find(|point| point.vector().len() != collection.dimensions)
        {
            return Err(MemoryError::upstream(
                Backend::VectorIndex,
                format!(
                    "point {} has {} dimensions, collection {name} expects {}",
                    point.id(),
                    point.vector().len(),
                    collection.dimensions
                ),
            ));
        }

        for point in points {
            collection.points.insert(point.id(), point);
        }
        Ok(())
    }

    async fn delete(&self, agent: AgentId, ids: &[PointId]) -> MemoryResult<()> {
        let name = collection_name(agent);
        let mut guard = self.collections.write().await;
        let collection = guard
            .get_mut(&name)
            .ok_or_else(|| missing_collection(&name))?;
        for id in ids {
            collection.points.remove(id);
        }
        Ok(())
    }

    async fn search(
        &self,
        agent: AgentId,
        vector: &EmbeddingVector,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<ScoredPoint>> {
        let name = collection_name(agent);
        let guard = self.collections.read().await;
        let collection = guard.get(&name).ok_or_else(|| missing_collection(&name))?;

        let mut matches: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|point| point.vector().len() == vector.len())
            .map(|point| ScoredPoint {
                point_id: point.id(),
                memory_id: point.memory_id(),
                score: point.vector().cosine(vector),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.point_id.cmp(&b.point_id))
        });
        matches.truncate(limit.get());
        Ok(matches)
    }

    async fn points(&self, agent: AgentId) -> MemoryResult<Vec<PointRef>> {
        let name = collection_name(agent);
        let guard = self.collections.read().await;
        let collection = guard.get(&name).ok_or_else(|| missing_collection(&name))?;
        Ok(collection
            .points
            .values()
            .map(|point| PointRef {
                point_id: point.id(),
                memory_id: point.memory_id(),
            })
            .collect())
    }
}
