//! Document store gateway and a local in-memory implementation.

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::ops::Bound;

use async_trait::async_trait;
use memo_primitives::{AgentId, MemoryId};
use tokio::sync::RwLock;

use crate::record::{Memory, MemoryUpdate, UpdateOutcome};
use crate::{MemoryError, MemoryResult};

/// Canonical record store for memories.
///
/// Every query is scoped by agent: a document owned by another agent behaves
/// exactly like a missing one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a batch in one call and returns how many documents the store
    /// acknowledged.
    async fn insert_many(&self, memories: &[Memory]) -> MemoryResult<usize>;

    /// Fetches one memory.
    async fn find_one(&self, agent: AgentId, id: MemoryId) -> MemoryResult<Option<Memory>>;

    /// Fetches every listed memory that exists for the agent, in no
    /// particular order.
    async fn find_many(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>>;

    /// Returns up to `limit` memories ordered by id descending, starting
    /// strictly below `before` when given.
    async fn list(
        &self,
        agent: AgentId,
        before: Option<MemoryId>,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<Memory>>;

    /// Replaces content per item, skipping items whose content is unchanged
    /// or that match no document.
    async fn update_contents(
        &self,
        agent: AgentId,
        updates: &[MemoryUpdate],
    ) -> MemoryResult<UpdateOutcome>;

    /// Removes exactly the listed memories and returns them.
    ///
    /// Fails with [`MemoryError::NotFound`] and removes nothing unless every
    /// id exists for the agent.
    async fn delete_exact(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>>;

    /// Removes all memories of an agent and returns how many were removed.
    async fn delete_agent(&self, agent: AgentId) -> MemoryResult<usize>;
}

/// Document store held in process memory, keyed per agent and ordered by id.
#[derive(Debug, Default)]
pub struct LocalDocumentStore {
    agents: RwLock<BTreeMap<AgentId, BTreeMap<MemoryId, Memory>>>,
}

impl LocalDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored documents across agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.values().map(BTreeMap::len).sum()
    }

    /// Whether no documents are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn insert_many(&self, memories: &[Memory]) -> MemoryResult<usize> {
        let mut guard = self.agents.write().await;
        let mut inserted = 0;
        for memory in memories {
            let documents = guard.entry(memory.agent_id()).or_default();
            if documents.contains_key(&memory.id()) {
                continue;
            }
            documents.insert(memory.id(), memory.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find_one(&self, agent: AgentId, id: MemoryId) -> MemoryResult<Option<Memory>> {
        let guard = self.agents.read().await;
        Ok(guard
            .get(&agent)
            .and_then(|documents| documents.get(&id))
            .cloned())
    }

    async fn find_many(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>> {
        let guard = self.agents.read().await;
        let Some(documents) = guard.get(&agent) else {
            return Ok(Vec::new());
        };
        let wanted: HashSet<_> = ids.iter().copied().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| documents.get(&id).cloned())
            .collect())
    }

    async fn list(
        &self,
        agent: AgentId,
        before: Option<MemoryId>,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<Memory>> {
        let guard = self.agents.read().await;
        let Some(documents) = guard.get(&agent) else {
            return Ok(Vec::new());
        };
        let upper = before.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(documents
            .range((Bound::Unbounded, upper))
            .rev()
            .take(limit.get())
            .map(|(_, memory)| memory.clone())
            .collect())
    }

    async fn update_contents(
        &self,
        agent: AgentId,
        updates: &[MemoryUpdate],
    ) -> MemoryResult<UpdateOutcome> {
        let mut guard = self.agents.write().await;
        let mut outcome = UpdateOutcome::default();
        let Some(documents) = guard.get_mut(&agent) else {
            return Ok(outcome);
        };
        for update in updates {
            if let Some(memory) = documents.get_mut(&update.id)
                && memory.content() != update.content
            {
                memory.set_content(update.content.clone());
                outcome.modified.push(memory.clone());
            }
        }
        Ok(outcome)
    }

    async fn delete_exact(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>> {
        let mut guard = self.agents.write().await;
        let documents = guard.get_mut(&agent);
        let missing = ids
            .iter()
            .filter(|id| documents.as_ref().is_none_or(|docs| !docs.contains_key(*id)))
            .count();
        if missing > 0 {
            return Err(MemoryError::not_found(format!(
                "{missing} of {} memories for agent {agent}",
                ids.len()
            )));
        }
        let Some(documents) = documents else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| documents.remove(id))
            .collect())
    }

    async fn delete_agent(&self, agent: AgentId) -> MemoryResult<usize> {
        let mut guard = self.agents.write().await;
        Ok(guard.remove(&agent).map_or(0, |documents| documents.len()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::record::MemoryDraft;

    fn memories(agent: AgentId, count: usize) -> Vec<Memory> {
        let now = Utc::now();
        (0..count)
            .map(|n| MemoryDraft::new(format!("memory {n}")).into_memory(agent, now))
            .collect()
    }

    #[tokio::test]
    async fn list_walks_backwards_from_offset() {
        let store = LocalDocumentStore::new();
        let agent = AgentId::random();
        let stored = memories(agent, 5);
        assert_eq!(store.insert_many(&stored).await.unwrap(), 5);

        let limit = NonZeroUsize::new(2).unwrap();
        let first = store.list(agent, None, limit).await.unwrap();
        assert_eq!(first[0].id(), stored[4].id());
        assert_eq!(first[1].id(), stored[3].id());

        let second = store.list(agent, Some(first[1].id()), limit).await.unwrap();
        assert_eq!(second[0].id(), stored[2].id());
    }

    #[tokio::test]
    async fn queries_are_scoped_by_agent() {
        let store = LocalDocumentStore::new();
        let owner = AgentId::random();
        let stranger = AgentId::random();
        let stored = memories(owner, 1);
        store.insert_many(&stored).await.unwrap();

        assert!(store.find_one(stranger, stored[0].id()).await.unwrap().is_none());
        let err = store
            .delete_exact(stranger, &[stored[0].id()])
            .await
            .expect_err("foreign memory");
        assert!(matches!(err, MemoryError::NotFound { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_exact_is_all_or_nothing() {
        let store = LocalDocumentStore::new();
        let agent = AgentId::random();
        let stored = memories(agent, 2);
        store.insert_many(&stored).await.unwrap();

        let err = store
            .delete_exact(agent, &[stored[0].id(), MemoryId::generate()])
            .await
            .expect_err("one id is unknown");
        assert!(matches!(err, MemoryError::NotFound { .. }));
        assert_eq!(store.len().await, 2);

        let removed = store.delete_exact(agent, &[stored[0].id()]).await.unwrap();
        assert_eq!(removed[0].point_id(), stored[0].point_id());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unchanged_content_is_not_modified() {
        let store = LocalDocumentStore::new();
        let agent = AgentId::random();
        let stored = memories(agent, 2);
        store.insert_many(&stored).await.unwrap();

        let outcome = store
            .update_contents(
                agent,
                &[
                    MemoryUpdate::new(stored[0].id(), stored[0].content()),
                    MemoryUpdate::new(stored[1].id(), "changed"),
                    MemoryUpdate::new(MemoryId::generate(), "unknown"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.modified.len(), 1);
        assert_eq!(outcome.modified[0].content(), "changed");
        assert_eq!(outcome.modified[0].point_id(), stored[1].point_id());
        assert!(outcome.failed.is_empty());
    }
}
