//! Memory records and the payloads accepted by the engine.

use chrono::{DateTime, Utc};
use memo_primitives::{AgentId, MemoryId, PointId};
use serde::{Deserialize, Serialize};

use crate::{MemoryError, MemoryResult};

/// A stored memory as held by the document store.
///
/// `id`, `agent_id`, `point_id` and `created_at` are fixed at creation; only
/// `content` changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    id: MemoryId,
    agent_id: AgentId,
    point_id: PointId,
    content: String,
    created_at: DateTime<Utc>,
}

impl Memory {
    /// Reassembles a memory from stored fields. Used by document store
    /// implementations when decoding rows.
    #[must_use]
    pub fn from_parts(
        id: MemoryId,
        agent_id: AgentId,
        point_id: PointId,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            agent_id,
            point_id,
            content,
            created_at,
        }
    }

    /// Returns the memory identifier.
    #[must_use]
    pub fn id(&self) -> MemoryId {
        self.id
    }

    /// Returns the owning agent.
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Returns the id of the memory's point in the agent's vector collection.
    #[must_use]
    pub fn point_id(&self) -> PointId {
        self.point_id
    }

    /// Returns the text body.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn set_content(&mut self, content: String) {
        self.content = content;
    }
}

/// Candidate memory submitted to [`MemoryEngine::add`](crate::MemoryEngine::add).
///
/// Identity fields exist so that callers forwarding client payloads can pass
/// them through unchanged; the engine rejects any draft that sets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDraft {
    /// Must be empty: ids are assigned by the engine.
    #[serde(default)]
    pub id: Option<MemoryId>,
    /// Must be empty: the owner is the agent the draft is added under.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Must be empty: point ids are assigned by the engine.
    #[serde(default)]
    pub point_id: Option<PointId>,
    /// Text body. Must not be blank.
    pub content: String,
    /// Creation time. Defaults to the time of insertion.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MemoryDraft {
    /// Creates a draft holding only content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets an explicit creation time.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub(crate) fn validate(&self) -> MemoryResult<()> {
        if self.id.is_some() {
            return Err(MemoryError::invalid_argument(
                "memory id is assigned by the engine and must not be supplied",
            ));
        }
        if self.agent_id.is_some() {
            return Err(MemoryError::invalid_argument(
                "agent id is taken from the request scope and must not be supplied",
            ));
        }
        if self.point_id.is_some() {
            return Err(MemoryError::invalid_argument(
                "point id is assigned by the engine and must not be supplied",
            ));
        }
        require_content(&self.content)
    }

    /// Assigns fresh identities and produces the record to insert.
    pub(crate) fn into_memory(self, agent: AgentId, now: DateTime<Utc>) -> Memory {
        Memory {
            id: MemoryId::generate(),
            agent_id: agent,
            point_id: PointId::generate(),
            content: self.content,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

/// New content for an existing memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    /// Memory to modify.
    pub id: MemoryId,
    /// Replacement text body. Must not be blank.
    pub content: String,
}

impl MemoryUpdate {
    /// Creates an update for the given memory.
    #[must_use]
    pub fn new(id: MemoryId, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
        }
    }

    pub(crate) fn validate(&self) -> MemoryResult<()> {
        require_content(&self.content)
    }
}

fn require_content(content: &str) -> MemoryResult<()> {
    if content.trim().is_empty() {
        return Err(MemoryError::invalid_argument(
            "memory content must not be empty",
        ));
    }
    Ok(())
}

/// Result of a bulk content update at the document store.
///
/// Updates are applied unordered: a failing item does not stop its siblings.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Documents whose content changed, with the new content applied.
    pub modified: Vec<Memory>,
    /// Items the store failed to apply, with the reason.
    pub failed: Vec<(MemoryId, String)>,
}

/// Memories returned by a search, ranked by similarity.
///
/// `scores[i]` is the similarity of `memories[i]` to the query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    /// Matching memories, most similar first.
    pub memories: Vec<Memory>,
    /// Similarity scores aligned with `memories`.
    pub scores: Vec<f32>,
}

impl SearchResults {
    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memories.len()
    }

    /// Whether the search produced no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// Iterates over `(memory, score)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (&Memory, f32)> {
        self.memories.iter().zip(self.scores.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafts_with_identity_fields_are_rejected() {
        let mut draft = MemoryDraft::new("likes tea");
        draft.id = Some(MemoryId::generate());
        assert!(matches!(
            draft.validate(),
            Err(MemoryError::InvalidArgument { .. })
        ));

        let mut draft = MemoryDraft::new("likes tea");
        draft.agent_id = Some(AgentId::random());
        assert!(matches!(
            draft.validate(),
            Err(MemoryError::InvalidArgument { .. })
        ));

        let mut draft = MemoryDraft::new("likes tea");
        draft.point_id = Some(PointId::generate());
        assert!(matches!(
            draft.validate(),
            Err(MemoryError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn blank_content_is_rejected() {
        assert!(MemoryDraft::new(" \n").validate().is_err());
        assert!(MemoryUpdate::new(MemoryId::generate(), "").validate().is_err());
    }

    #[test]
    fn into_memory_assigns_identity_and_keeps_explicit_timestamp() {
        let agent = AgentId::random();
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(1);

        let memory = MemoryDraft::new("likes tea").into_memory(agent, now);
        assert_eq!(memory.agent_id(), agent);
        assert_eq!(memory.created_at(), now);

        let memory = MemoryDraft::new("likes tea")
            .created_at(earlier)
            .into_memory(agent, now);
        assert_eq!(memory.created_at(), earlier);
    }

    #[test]
    fn drafts_deserialize_without_identity_fields() {
        let draft: MemoryDraft = serde_json::from_str(r#"{"content":"likes tea"}"#).unwrap();
        assert_eq!(draft, MemoryDraft::new("likes tea"));
    }
}
