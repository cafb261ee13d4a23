//! Memory synchronisation engine.
//!
//! Every mutation is a short saga over two stores that share no transaction.
//! The order of steps is fixed so that a failure part-way leaves one of two
//! well-defined states, both reported to the caller:
//!
//! * add, update and reindex write documents first and vectors second. A
//!   vector-side failure yields [`MemoryError::VectorsMissing`] naming the
//!   affected memories, which [`MemoryEngine::reindex`] repairs.
//! * delete removes documents first and points second. A point-side failure
//!   that survives the configured retries yields
//!   [`MemoryError::OrphanedPoints`].
//!
//! Nothing is rolled back automatically.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use memo_adapters::traits::EmbeddingProvider;
use memo_primitives::{AgentId, MemoryId, PointId};
use tracing::{debug, warn};

use crate::document_store::DocumentStore;
use crate::embeddings::EmbeddingVector;
use crate::error::Backend;
use crate::locks::MutationLocks;
use crate::record::{Memory, MemoryDraft, MemoryUpdate, SearchResults};
use crate::vector_index::{VectorIndex, VectorPoint};
use crate::{MemoryError, MemoryResult};

/// Tunables for [`MemoryEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    list_limit: NonZeroUsize,
    search_limit: NonZeroUsize,
    delete_attempts: NonZeroU32,
    retry_backoff: Duration,
    lock_stripes: NonZeroUsize,
}

impl EngineConfig {
    /// Creates a configuration with the given page size and search result
    /// count, and default retry and locking settings.
    #[must_use]
    pub fn new(list_limit: NonZeroUsize, search_limit: NonZeroUsize) -> Self {
        Self {
            list_limit,
            search_limit,
            ..Self::default()
        }
    }

    /// Sets how many times a point delete is attempted before the points are
    /// reported as orphaned.
    #[must_use]
    pub fn with_delete_attempts(mut self, attempts: NonZeroU32) -> Self {
        self.delete_attempts = attempts;
        self
    }

    /// Sets the delay before the first point-delete retry. The delay doubles
    /// on each further retry.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the number of mutation lock stripes.
    #[must_use]
    pub fn with_lock_stripes(mut self, stripes: NonZeroUsize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    /// Returns the page size used by [`MemoryEngine::list`].
    #[must_use]
    pub const fn list_limit(self) -> NonZeroUsize {
        self.list_limit
    }

    /// Returns the result count used by [`MemoryEngine::search`].
    #[must_use]
    pub const fn search_limit(self) -> NonZeroUsize {
        self.search_limit
    }

    /// Returns the number of point-delete attempts.
    #[must_use]
    pub const fn delete_attempts(self) -> NonZeroU32 {
        self.delete_attempts
    }

    /// Returns the initial point-delete retry delay.
    #[must_use]
    pub const fn retry_backoff(self) -> Duration {
        self.retry_backoff
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            list_limit: NonZeroUsize::new(15).expect("non-zero"),
            search_limit: NonZeroUsize::new(5).expect("non-zero"),
            delete_attempts: NonZeroU32::new(3).expect("non-zero"),
            retry_backoff: Duration::from_millis(100),
            lock_stripes: NonZeroUsize::new(64).expect("non-zero"),
        }
    }
}

/// Keeps memories consistent across the document store and the vector index.
#[derive(Clone)]
pub struct MemoryEngine {
    documents: Arc<dyn DocumentStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    locks: Arc<MutationLocks>,
    config: EngineConfig,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = self.embedder.metadata();
        f.debug_struct("MemoryEngine")
            .field("provider", &metadata.provider())
            .field("model", &metadata.model())
            .field("dimensions", &metadata.dimensions())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Assembles an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the embedding provider
    /// reports zero dimensions.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> MemoryResult<Self> {
        if embedder.metadata().dimensions() == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding provider reports zero dimensions",
            ));
        }
        Ok(Self {
            documents,
            vectors,
            embedder,
            locks: Arc::new(MutationLocks::new(config.lock_stripes)),
            config,
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub(crate) fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    pub(crate) fn vectors(&self) -> &dyn VectorIndex {
        self.vectors.as_ref()
    }

    fn dimensions(&self) -> usize {
        self.embedder.metadata().dimensions()
    }

    /// Creates the agent's vector collection. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates vector index failures.
    pub async fn open_agent(&self, agent: AgentId) -> MemoryResult<()> {
        self.vectors
            .create_collection(agent, self.dimensions())
            .await?;
        debug!(agent_id = %agent, dimensions = self.dimensions(), "agent collection ready");
        Ok(())
    }

    /// Removes every memory of the agent, then drops its vector collection.
    /// Returns the number of documents removed.
    ///
    /// # Errors
    ///
    /// Propagates store failures. If the collection drop fails the documents
    /// are already gone; calling again completes the purge.
    pub async fn purge_agent(&self, agent: AgentId) -> MemoryResult<usize> {
        let removed = self.documents.delete_agent(agent).await?;
        self.vectors.drop_collection(agent).await.inspect_err(|err| {
            warn!(agent_id = %agent, removed, ?err, "agent documents purged but collection drop failed");
        })?;
        debug!(agent_id = %agent, removed, "agent purged");
        Ok(removed)
    }

    /// Adds a batch of memories and returns their ids in input order.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidArgument`] before any store call if the batch
    ///   is empty or a draft carries identity fields or blank content.
    /// * [`MemoryError::PartialWrite`] if the document store acknowledged only
    ///   part of the batch. No vectors are written.
    /// * [`MemoryError::VectorsMissing`] if the documents were stored but the
    ///   embedding or upsert failed.
    pub async fn add(&self, agent: AgentId, drafts: Vec<MemoryDraft>) -> MemoryResult<Vec<MemoryId>> {
        if drafts.is_empty() {
            return Err(MemoryError::invalid_argument(
                "at least one memory is required",
            ));
        }
        for draft in &drafts {
            draft.validate()?;
        }

        let now = Utc::now();
        let memories: Vec<Memory> = drafts
            .into_iter()
            .map(|draft| draft.into_memory(agent, now))
            .collect();
        let ids: Vec<MemoryId> = memories.iter().map(Memory::id).collect();

        let acknowledged = self.documents.insert_many(&memories).await?;
        if acknowledged != memories.len() {
            warn!(agent_id = %agent, expected = memories.len(), acknowledged, "partial memory insert");
            return Err(MemoryError::PartialWrite {
                expected: memories.len(),
                acknowledged,
            });
        }

        self.index(agent, &memories)
            .await
            .map_err(|err| vectors_missing(agent, ids.clone(), err))?;

        debug!(agent_id = %agent, count = ids.len(), "memories added");
        Ok(ids)
    }

    /// Adds a single memory.
    ///
    /// # Errors
    ///
    /// See [`MemoryEngine::add`].
    pub async fn add_one(&self, agent: AgentId, draft: MemoryDraft) -> MemoryResult<MemoryId> {
        let ids = self.add(agent, vec![draft]).await?;
        ids.into_iter()
            .next()
            .ok_or(MemoryError::PartialWrite {
                expected: 1,
                acknowledged: 0,
            })
    }

    /// Fetches one memory owned by the agent.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if the memory does not exist or is
    /// owned by another agent.
    pub async fn get(&self, agent: AgentId, id: MemoryId) -> MemoryResult<Memory> {
        self.documents
            .find_one(agent, id)
            .await?
            .ok_or_else(|| MemoryError::not_found(format!("memory {id} for agent {agent}")))
    }

    /// Fetches several memories, returned in the order requested. Repeated
    /// ids are returned once.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::PartialResult`] if any id is missing or owned by
    /// another agent.
    pub async fn get_many(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let found = self.documents.find_many(agent, &ids).await?;
        if found.len() != ids.len() {
            return Err(MemoryError::PartialResult {
                expected: ids.len(),
                resolved: found.len(),
            });
        }

        let mut by_id: HashMap<MemoryId, Memory> =
            found.into_iter().map(|memory| (memory.id(), memory)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Returns the newest page of memories, or the page just older than
    /// `offset`, sized by the configured list limit.
    ///
    /// Passing the id of the last memory of a page as `offset` yields the next
    /// page.
    ///
    /// # Errors
    ///
    /// Propagates document store failures.
    pub async fn list(&self, agent: AgentId, offset: Option<MemoryId>) -> MemoryResult<Vec<Memory>> {
        self.list_page(agent, offset, self.config.list_limit).await
    }

    /// Like [`MemoryEngine::list`] with an explicit page size.
    ///
    /// # Errors
    ///
    /// Propagates document store failures.
    pub async fn list_page(
        &self,
        agent: AgentId,
        offset: Option<MemoryId>,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<Memory>> {
        self.documents.list(agent, offset, limit).await
    }

    /// Replaces the content of a batch of memories and re-indexes the ones
    /// that changed. Returns the ids whose content changed.
    ///
    /// Items naming an unknown memory, or repeating the current content, are
    /// skipped without any embedding work.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidArgument`] for an empty batch, blank content or
    ///   an id repeated within the batch.
    /// * [`MemoryError::NotModified`] if no document changed.
    /// * [`MemoryError::VectorsMissing`] if documents changed but their points
    ///   could not be rewritten.
    /// * [`MemoryError::PartialWrite`] if the store failed some items; the
    ///   others were applied and re-indexed.
    pub async fn update(
        &self,
        agent: AgentId,
        updates: Vec<MemoryUpdate>,
    ) -> MemoryResult<Vec<MemoryId>> {
        if updates.is_empty() {
            return Err(MemoryError::invalid_argument(
                "at least one update is required",
            ));
        }
        let mut seen = HashSet::with_capacity(updates.len());
        for update in &updates {
            update.validate()?;
            if !seen.insert(update.id) {
                return Err(MemoryError::invalid_argument(format!(
                    "memory {} appears more than once in the batch",
                    update.id
                )));
            }
        }

        let _guard = self.locks.lock(updates.iter().map(|update| update.id)).await;

        let outcome = self.documents.update_contents(agent, &updates).await?;
        if outcome.modified.is_empty() {
            return match outcome.failed.into_iter().next() {
                Some((id, reason)) => Err(MemoryError::upstream(
                    Backend::DocumentStore,
                    format!("update of memory {id} failed: {reason}"),
                )),
                None => Err(MemoryError::NotModified),
            };
        }

        let ids: Vec<MemoryId> = outcome.modified.iter().map(Memory::id).collect();
        self.index(agent, &outcome.modified)
            .await
            .map_err(|err| vectors_missing(agent, ids.clone(), err))?;

        if !outcome.failed.is_empty() {
            warn!(
                agent_id = %agent,
                modified = ids.len(),
                failed = outcome.failed.len(),
                "memory update partially applied"
            );
            return Err(MemoryError::PartialWrite {
                expected: ids.len() + outcome.failed.len(),
                acknowledged: ids.len(),
            });
        }

        debug!(agent_id = %agent, count = ids.len(), "memories updated");
        Ok(ids)
    }

    /// Replaces the content of a single memory.
    ///
    /// # Errors
    ///
    /// See [`MemoryEngine::update`].
    pub async fn update_one(&self, agent: AgentId, update: MemoryUpdate) -> MemoryResult<()> {
        self.update(agent, vec![update]).await.map(|_| ())
    }

    /// Deletes a batch of memories and their points. Repeated ids count once.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::NotFound`] if any id is missing or owned by another
    ///   agent. Nothing is deleted in that case.
    /// * [`MemoryError::OrphanedPoints`] if the documents were deleted but the
    ///   points survived every delete attempt.
    pub async fn delete(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<()> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Err(MemoryError::invalid_argument(
                "at least one memory id is required",
            ));
        }

        let _guard = self.locks.lock(ids.iter().copied()).await;

        let removed = self.documents.delete_exact(agent, &ids).await?;
        let point_ids: Vec<PointId> = removed.iter().map(Memory::point_id).collect();
        self.delete_points(agent, &point_ids).await?;

        debug!(agent_id = %agent, count = removed.len(), "memories deleted");
        Ok(())
    }

    /// Deletes a single memory.
    ///
    /// # Errors
    ///
    /// See [`MemoryEngine::delete`].
    pub async fn delete_one(&self, agent: AgentId, id: MemoryId) -> MemoryResult<()> {
        self.delete(agent, &[id]).await
    }

    /// Returns the memories most similar to `query`, best first, sized by the
    /// configured search limit.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidArgument`] for a blank query.
    /// * [`MemoryError::NotFound`] if the index holds no match.
    /// * [`MemoryError::PartialResult`] if some matched points have no
    ///   document.
    pub async fn search(&self, agent: AgentId, query: &str) -> MemoryResult<SearchResults> {
        self.search_with_limit(agent, query, self.config.search_limit)
            .await
    }

    /// Like [`MemoryEngine::search`] with an explicit result count.
    ///
    /// # Errors
    ///
    /// See [`MemoryEngine::search`].
    pub async fn search_with_limit(
        &self,
        agent: AgentId,
        query: &str,
        limit: NonZeroUsize,
    ) -> MemoryResult<SearchResults> {
        if query.trim().is_empty() {
            return Err(MemoryError::invalid_argument(
                "search query must not be empty",
            ));
        }

        let vector = self
            .embed(&[query.to_owned()])
            .await?
            .pop()
            .ok_or_else(|| MemoryError::upstream(Backend::EmbeddingProvider, "no query embedding"))?;

        let hits = self.vectors.search(agent, &vector, limit).await?;
        if hits.is_empty() {
            return Err(MemoryError::not_found(format!(
                "memories matching the query for agent {agent}"
            )));
        }

        let ids = distinct(&hits.iter().map(|hit| hit.memory_id).collect::<Vec<_>>());
        let found = self.documents.find_many(agent, &ids).await?;
        if found.len() < ids.len() {
            warn!(
                agent_id = %agent,
                matched = ids.len(),
                resolved = found.len(),
                "search matched points without documents"
            );
            return Err(MemoryError::PartialResult {
                expected: ids.len(),
                resolved: found.len(),
            });
        }

        let by_id: HashMap<MemoryId, Memory> =
            found.into_iter().map(|memory| (memory.id(), memory)).collect();
        let mut results = SearchResults::default();
        for hit in hits {
            if let Some(memory) = by_id.get(&hit.memory_id) {
                results.memories.push(memory.clone());
                results.scores.push(hit.score);
            }
        }
        Ok(results)
    }

    /// Re-embeds stored memories and rewrites their points at their existing
    /// point ids. Repairs [`MemoryError::VectorsMissing`].
    ///
    /// # Errors
    ///
    /// * [`MemoryError::PartialResult`] if any id is missing for the agent.
    ///   Nothing is re-indexed in that case.
    /// * [`MemoryError::VectorsMissing`] if the embedding or upsert failed
    ///   again.
    pub async fn reindex(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<()> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(());
        }

        let _guard = self.locks.lock(ids.iter().copied()).await;

        let memories = self.documents.find_many(agent, &ids).await?;
        if memories.len() != ids.len() {
            return Err(MemoryError::PartialResult {
                expected: ids.len(),
                resolved: memories.len(),
            });
        }

        self.index(agent, &memories)
            .await
            .map_err(|err| vectors_missing(agent, ids.clone(), err))?;
        debug!(agent_id = %agent, count = ids.len(), "memories re-indexed");
        Ok(())
    }

    /// Embeds the memories' content in one provider call and upserts one point
    /// per memory at its point id.
    async fn index(&self, agent: AgentId, memories: &[Memory]) -> MemoryResult<()> {
        let texts: Vec<String> = memories
            .iter()
            .map(|memory| memory.content().to_owned())
            .collect();
        let vectors = self.embed(&texts).await?;

        let points = memories
            .iter()
            .zip(vectors)
            .map(|(memory, vector)| VectorPoint::new(memory.point_id(), vector, memory.id()))
            .collect();
        self.vectors.upsert(agent, points).await
    }

    /// One provider call; results are placed by the provider's index and
    /// validated against the configured dimensions.
    async fn embed(&self, texts: &[String]) -> MemoryResult<Vec<EmbeddingVector>> {
        let dimensions = self.dimensions();
        self.embedder
            .embed_ordered(texts)
            .await?
            .into_iter()
            .map(|values| EmbeddingVector::from_provider(values, dimensions))
            .collect()
    }

    /// Deletes points, retrying with doubling backoff. Exhausted retries
    /// report the points as orphaned.
    pub(crate) async fn delete_points(&self, agent: AgentId, point_ids: &[PointId]) -> MemoryResult<()> {
        if point_ids.is_empty() {
            return Ok(());
        }

        let attempts = self.config.delete_attempts.get();
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;
        loop {
            match self.vectors.delete(agent, point_ids).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    warn!(agent_id = %agent, attempt, ?err, "point delete failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        agent_id = %agent,
                        count = point_ids.len(),
                        ?err,
                        "documents deleted but points remain"
                    );
                    return Err(MemoryError::OrphanedPoints {
                        point_ids: point_ids.to_vec(),
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

fn vectors_missing(agent: AgentId, ids: Vec<MemoryId>, err: MemoryError) -> MemoryError {
    warn!(agent_id = %agent, count = ids.len(), ?err, "documents persisted without vectors");
    MemoryError::VectorsMissing {
        ids,
        source: Box::new(err),
    }
}

/// Drops repeated ids, keeping first occurrences in order.
fn distinct(ids: &[MemoryId]) -> Vec<MemoryId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use memo_adapters::hashing::HashingEmbedder;

    use super::*;
    use crate::document_store::LocalDocumentStore;
    use crate::vector_index::LocalVectorIndex;

    fn engine() -> MemoryEngine {
        MemoryEngine::new(
            Arc::new(LocalDocumentStore::new()),
            Arc::new(LocalVectorIndex::new()),
            Arc::new(HashingEmbedder::new(NonZeroUsize::new(32).unwrap())),
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn distinct_keeps_first_occurrence_order() {
        let a = MemoryId::generate();
        let b = MemoryId::generate();
        assert_eq!(distinct(&[b, a, b, a]), vec![b, a]);
    }

    #[test]
    fn default_config_matches_deployment_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.list_limit().get(), 15);
        assert_eq!(config.search_limit().get(), 5);
        assert_eq!(config.delete_attempts().get(), 3);
    }

    #[tokio::test]
    async fn empty_batches_are_rejected_before_store_calls() {
        let engine = engine();
        let agent = AgentId::random();

        assert!(matches!(
            engine.add(agent, Vec::new()).await,
            Err(MemoryError::InvalidArgument { .. })
        ));
        assert!(matches!(
            engine.update(agent, Vec::new()).await,
            Err(MemoryError::InvalidArgument { .. })
        ));
        assert!(matches!(
            engine.delete(agent, &[]).await,
            Err(MemoryError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_update_are_rejected() {
        let engine = engine();
        let agent = AgentId::random();
        let id = MemoryId::generate();

        let err = engine
            .update(
                agent,
                vec![MemoryUpdate::new(id, "one"), MemoryUpdate::new(id, "two")],
            )
            .await
            .expect_err("duplicate id");
        assert!(matches!(err, MemoryError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn blank_search_query_is_rejected() {
        let engine = engine();
        let err = engine
            .search(AgentId::random(), "   ")
            .await
            .expect_err("blank query");
        assert!(matches!(err, MemoryError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn zero_dimension_provider_is_rejected() {
        #[derive(Debug)]
        struct Degenerate(memo_adapters::traits::AdapterMetadata);

        #[async_trait::async_trait]
        impl EmbeddingProvider for Degenerate {
            fn metadata(&self) -> &memo_adapters::traits::AdapterMetadata {
                &self.0
            }

            async fn embed(
                &self,
                _inputs: &[String],
            ) -> memo_adapters::traits::AdapterResult<Vec<memo_adapters::traits::IndexedEmbedding>>
            {
                Ok(Vec::new())
            }
        }

        let err = MemoryEngine::new(
            Arc::new(LocalDocumentStore::new()),
            Arc::new(LocalVectorIndex::new()),
            Arc::new(Degenerate(memo_adapters::traits::AdapterMetadata::new(
                "degenerate",
                "none",
                0,
            ))),
            EngineConfig::default(),
        )
        .expect_err("zero dimensions");
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }
}
