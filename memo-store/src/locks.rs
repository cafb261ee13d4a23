//! Striped per-memory mutation locks.

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use memo_primitives::MemoryId;
use tokio::sync::{Mutex, MutexGuard};

/// Fixed set of async mutexes, each guarding every memory id that hashes to it.
///
/// Holding the stripes of a batch serialises the document and vector steps of
/// concurrent mutations touching the same ids within this process. Distinct
/// ids may share a stripe; that only costs concurrency.
#[derive(Debug)]
pub struct MutationLocks {
    stripes: Vec<Mutex<()>>,
}

/// Guards for every stripe of a batch, released on drop.
#[derive(Debug)]
pub struct BatchGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl MutationLocks {
    /// Creates `stripes` independent locks.
    #[must_use]
    pub fn new(stripes: NonZeroUsize) -> Self {
        Self {
            stripes: (0..stripes.get()).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, id: MemoryId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        usize::try_from(hasher.finish() % self.stripes.len() as u64).unwrap_or_default()
    }

    /// Locks the stripes of every id in the batch.
    ///
    /// Stripes are taken in ascending order, so overlapping batches cannot
    /// deadlock against each other.
    pub async fn lock<'a>(&'a self, ids: impl IntoIterator<Item = MemoryId>) -> BatchGuard<'a> {
        let stripes: BTreeSet<usize> = ids.into_iter().map(|id| self.stripe(id)).collect();
        let mut guards = Vec::with_capacity(stripes.len());
        for stripe in stripes {
            guards.push(self.stripes[stripe].lock().await);
        }
        BatchGuard { _guards: guards }
    }
}

impl Default for MutationLocks {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(64).expect("non-zero"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_id_is_serialised() {
        let locks = Arc::new(MutationLocks::default());
        let id = MemoryId::generate();

        let guard = locks.lock([id]).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock([id]).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_batches_do_not_deadlock() {
        let locks = Arc::new(MutationLocks::new(NonZeroUsize::new(4).unwrap()));
        let ids: Vec<MemoryId> = (0..16).map(|_| MemoryId::generate()).collect();

        let mut tasks = Vec::new();
        for n in 0..8 {
            let locks = Arc::clone(&locks);
            let mut batch = ids.clone();
            batch.rotate_left(n);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(batch).await;
                tokio::task::yield_now().await;
            }));
        }

        let all = futures::future::join_all(tasks);
        let results = tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("no deadlock");
        assert!(results.into_iter().all(|result| result.is_ok()));
    }
}
