//! Out-of-band drift detection and repair between the two stores.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use memo_primitives::{AgentId, MemoryId, PointId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{MemoryError, MemoryResult};
use crate::engine::MemoryEngine;

/// Disagreement between the document store and an agent's vector collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Agent the report covers.
    pub agent_id: Option<AgentId>,
    /// Memories whose point is absent from the collection.
    pub missing_vectors: Vec<MemoryId>,
    /// Points with no document behind them.
    pub orphaned_points: Vec<PointId>,
}

impl DriftReport {
    /// Whether both stores agree.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_vectors.is_empty() && self.orphaned_points.is_empty()
    }
}

impl MemoryEngine {
    /// Compares every document of the agent, read in pages of `batch`, with
    /// every point in the agent's collection.
    ///
    /// Mutations running concurrently can show up as transient drift; run this
    /// when the agent is quiet or confirm findings with a second pass.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn reconcile(&self, agent: AgentId, batch: NonZeroUsize) -> MemoryResult<DriftReport> {
        let indexed: HashSet<PointId> = self
            .vectors()
            .points(agent)
            .await?
            .into_iter()
            .map(|point| point.point_id)
            .collect();

        let mut report = DriftReport {
            agent_id: Some(agent),
            ..DriftReport::default()
        };
        let mut documented = HashSet::new();
        let mut offset = None;
        loop {
            let page = self.documents().list(agent, offset, batch).await?;
            for memory in &page {
                documented.insert(memory.point_id());
                if !indexed.contains(&memory.point_id()) {
                    report.missing_vectors.push(memory.id());
                }
            }
            match page.last() {
                Some(last) if page.len() == batch.get() => offset = Some(last.id()),
                _ => break,
            }
        }

        report.orphaned_points = indexed
            .into_iter()
            .filter(|point| !documented.contains(point))
            .collect();
        report.orphaned_points.sort_unstable();

        if report.is_clean() {
            debug!(agent_id = %agent, documents = documented.len(), "no drift found");
        } else {
            warn!(
                agent_id = %agent,
                missing_vectors = report.missing_vectors.len(),
                orphaned_points = report.orphaned_points.len(),
                "drift found"
            );
        }
        Ok(report)
    }

    /// Re-indexes the report's missing vectors and deletes its orphaned
    /// points. The report must have been produced for `agent`.
    ///
    /// # Errors
    ///
    /// * [`MemoryError::InvalidArgument`] if the report names no agent or a
    ///   different one. Nothing is touched in that case.
    /// * Otherwise the first failing step's error; steps are idempotent, so the
    ///   repair can be retried with the same report.
    pub async fn repair(&self, agent: AgentId, report: &DriftReport) -> MemoryResult<()> {
        match report.agent_id {
            Some(owner) if owner == agent => {}
            Some(owner) => {
                return Err(MemoryError::invalid_argument(format!(
                    "drift report covers agent {owner}, not {agent}"
                )));
            }
            None => {
                return Err(MemoryError::invalid_argument(
                    "drift report names no agent",
                ));
            }
        }

        self.reindex(agent, &report.missing_vectors).await?;
        self.delete_points(agent, &report.orphaned_points).await?;
        debug!(
            agent_id = %agent,
            reindexed = report.missing_vectors.len(),
            deleted = report.orphaned_points.len(),
            "drift repaired"
        );
        Ok(())
    }
}
