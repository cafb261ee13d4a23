//! Document store backed by SQLite through `sqlx`.
//!
//! Ids are stored as lowercase hyphenated text. Memory ids are UUIDv7, so
//! ordering the text column orders by creation time.

use std::num::NonZeroUsize;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memo_primitives::{AgentId, MemoryId, PointId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::document_store::DocumentStore;
use crate::error::Backend;
use crate::record::{Memory, MemoryUpdate, UpdateOutcome};
use crate::{MemoryError, MemoryResult};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS memories (
        id          TEXT PRIMARY KEY NOT NULL,
        agent_id    TEXT NOT NULL,
        point_id    TEXT NOT NULL,
        content     TEXT NOT NULL,
        created_at  TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS memories_agent_id_id ON memories (agent_id, id)",
];

const COLUMNS: &str = "id, agent_id, point_id, content, created_at";

/// Ids bound per `IN (...)` list. Older SQLite builds cap a statement at 999
/// bound variables.
const ID_CHUNK: usize = 500;

fn store_error(err: impl std::fmt::Display) -> MemoryError {
    MemoryError::upstream(Backend::DocumentStore, err.to_string())
}

/// SQLite document store.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Connects to `url` (for example `sqlite://memo.db` or `sqlite::memory:`),
    /// creating the database file and schema when missing.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Upstream`] if the URL is invalid, the connection
    /// fails, or the schema cannot be created.
    pub async fn connect(url: &str) -> MemoryResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(store_error)?
            .create_if_missing(true);

        // Each connection to an in-memory database sees its own database, so
        // the pool must hold exactly one and never recycle it.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(options)
        .await
        .map_err(store_error)?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Upstream`] if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> MemoryResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(store_error)?;
        }
        debug!("sqlite document store ready");
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode(row: &SqliteRow) -> MemoryResult<Memory> {
    let text = |column: &str| row.try_get::<String, _>(column).map_err(store_error);

    let created_at = DateTime::parse_from_rfc3339(&text("created_at")?)
        .map_err(|err| store_error(format!("corrupt created_at: {err}")))?
        .with_timezone(&Utc);

    Ok(Memory::from_parts(
        text("id")?.parse::<MemoryId>().map_err(store_error)?,
        text("agent_id")?.parse::<AgentId>().map_err(store_error)?,
        text("point_id")?.parse::<PointId>().map_err(store_error)?,
        text("content")?,
        created_at,
    ))
}

fn select_in(agent: AgentId, ids: &[MemoryId]) -> QueryBuilder<'static, Sqlite> {
    where_in(format!("SELECT {COLUMNS} FROM memories WHERE agent_id = "), agent, ids)
}

fn delete_in(agent: AgentId, ids: &[MemoryId]) -> QueryBuilder<'static, Sqlite> {
    where_in("DELETE FROM memories WHERE agent_id = ".to_owned(), agent, ids)
}

fn where_in(head: String, agent: AgentId, ids: &[MemoryId]) -> QueryBuilder<'static, Sqlite> {
    let mut query = QueryBuilder::new(head);
    query.push_bind(agent.to_string()).push(" AND id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");
    query
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert_many(&self, memories: &[Memory]) -> MemoryResult<usize> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut inserted = 0_u64;
        for memory in memories {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO memories (id, agent_id, point_id, content, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(memory.id().to_string())
            .bind(memory.agent_id().to_string())
            .bind(memory.point_id().to_string())
            .bind(memory.content())
            .bind(memory.created_at().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(store_error)?;
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }

    async fn find_one(&self, agent: AgentId, id: MemoryId) -> MemoryResult<Option<Memory>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM memories WHERE agent_id = ? AND id = ?"
        ))
        .bind(agent.to_string())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_many(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>> {
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let rows = select_in(agent, chunk)
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(store_error)?;
            for row in &rows {
                found.push(decode(row)?);
            }
        }
        Ok(found)
    }

    async fn list(
        &self,
        agent: AgentId,
        before: Option<MemoryId>,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<Memory>> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM memories WHERE agent_id = "));
        query.push_bind(agent.to_string());
        if let Some(before) = before {
            query.push(" AND id < ").push_bind(before.to_string());
        }
        query
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(i64::try_from(limit.get()).unwrap_or(i64::MAX));

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(decode).collect()
    }

    async fn update_contents(
        &self,
        agent: AgentId,
        updates: &[MemoryUpdate],
    ) -> MemoryResult<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        for update in updates {
            let result = sqlx::query(&format!(
                "UPDATE memories SET content = ? \
                 WHERE agent_id = ? AND id = ? AND content <> ? \
                 RETURNING {COLUMNS}"
            ))
            .bind(&update.content)
            .bind(agent.to_string())
            .bind(update.id.to_string())
            .bind(&update.content)
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(Some(row)) => match decode(&row) {
                    Ok(memory) => outcome.modified.push(memory),
                    Err(err) => {
                        warn!(memory_id = %update.id, ?err, "updated memory could not be read back");
                        outcome.failed.push((update.id, err.to_string()));
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    warn!(memory_id = %update.id, ?err, "memory update failed");
                    outcome.failed.push((update.id, err.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    async fn delete_exact(&self, agent: AgentId, ids: &[MemoryId]) -> MemoryResult<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let mut removed = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let rows = select_in(agent, chunk)
                .build()
                .fetch_all(&mut *tx)
                .await
                .map_err(store_error)?;
            for row in &rows {
                removed.push(decode(row)?);
            }
        }
        if removed.len() != ids.len() {
            return Err(MemoryError::not_found(format!(
                "{} of {} memories for agent {agent}",
                ids.len() - removed.len(),
                ids.len()
            )));
        }

        for chunk in ids.chunks(ID_CHUNK) {
            delete_in(agent, chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)?;
        Ok(removed)
    }

    async fn delete_agent(&self, agent: AgentId) -> MemoryResult<usize> {
        let result = sqlx::query("DELETE FROM memories WHERE agent_id = ?")
            .bind(agent.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryDraft;

    async fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::connect("sqlite::memory:").await.unwrap()
    }

    fn memories(agent: AgentId, count: usize) -> Vec<Memory> {
        let now = Utc::now();
        (0..count)
            .map(|n| MemoryDraft::new(format!("memory {n}")).into_memory(agent, now))
            .collect()
    }

    #[tokio::test]
    async fn insert_and_find_round_trip_fields() {
        let store = store().await;
        let agent = AgentId::random();
        let stored = memories(agent, 3);
        assert_eq!(store.insert_many(&stored).await.unwrap(), 3);
        assert_eq!(store.insert_many(&stored[..1]).await.unwrap(), 0);

        let found = store.find_one(agent, stored[1].id()).await.unwrap().unwrap();
        assert_eq!(found.point_id(), stored[1].point_id());
        assert_eq!(found.content(), "memory 1");
        assert_eq!(
            found.created_at().timestamp_micros(),
            stored[1].created_at().timestamp_micros()
        );

        let ids: Vec<_> = stored.iter().map(Memory::id).collect();
        assert_eq!(store.find_many(agent, &ids).await.unwrap().len(), 3);
        assert!(store.find_many(AgentId::random(), &ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_pages_newest_first() {
        let store = store().await;
        let agent = AgentId::random();
        let stored = memories(agent, 5);
        store.insert_many(&stored).await.unwrap();

        let limit = NonZeroUsize::new(3).unwrap();
        let first = store.list(agent, None, limit).await.unwrap();
        let first_ids: Vec<_> = first.iter().map(Memory::id).collect();
        assert_eq!(first_ids, vec![stored[4].id(), stored[3].id(), stored[2].id()]);

        let rest = store.list(agent, Some(stored[2].id()), limit).await.unwrap();
        let rest_ids: Vec<_> = rest.iter().map(Memory::id).collect();
        assert_eq!(rest_ids, vec![stored[1].id(), stored[0].id()]);
    }

    #[tokio::test]
    async fn update_skips_unchanged_and_unknown_items() {
        let store = store().await;
        let agent = AgentId::random();
        let stored = memories(agent, 2);
        store.insert_many(&stored).await.unwrap();

        let outcome = store
            .update_contents(
                agent,
                &[
                    MemoryUpdate::new(stored[0].id(), "memory 0"),
                    MemoryUpdate::new(stored[1].id(), "rewritten"),
                    MemoryUpdate::new(MemoryId::generate(), "nobody"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.modified.len(), 1);
        assert_eq!(outcome.modified[0].id(), stored[1].id());
        assert_eq!(outcome.modified[0].content(), "rewritten");
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn unreadable_updated_row_is_reported_per_item() {
        let store = store().await;
        let agent = AgentId::random();
        let stored = memories(agent, 2);
        store.insert_many(&stored).await.unwrap();
        sqlx::query("UPDATE memories SET created_at = 'not a timestamp' WHERE id = ?")
            .bind(stored[0].id().to_string())
            .execute(store.pool())
            .await
            .unwrap();

        let outcome = store
            .update_contents(
                agent,
                &[
                    MemoryUpdate::new(stored[0].id(), "first rewritten"),
                    MemoryUpdate::new(stored[1].id(), "second rewritten"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.modified.len(), 1);
        assert_eq!(outcome.modified[0].id(), stored[1].id());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, stored[0].id());
        assert!(outcome.failed[0].1.contains("created_at"));
    }

    #[tokio::test]
    async fn batches_larger_than_one_statement_are_chunked() {
        let store = store().await;
        let agent = AgentId::random();
        let stored = memories(agent, ID_CHUNK * 2 + 7);
        store.insert_many(&stored).await.unwrap();
        let mut ids: Vec<_> = stored.iter().map(Memory::id).collect();

        assert_eq!(store.find_many(agent, &ids).await.unwrap().len(), stored.len());

        ids.push(MemoryId::generate());
        let err = store
            .delete_exact(agent, &ids)
            .await
            .expect_err("one id is unknown");
        assert!(matches!(err, MemoryError::NotFound { .. }));
        ids.pop();
        assert_eq!(store.find_many(agent, &ids).await.unwrap().len(), stored.len());

        let removed = store.delete_exact(agent, &ids).await.unwrap();
        assert_eq!(removed.len(), stored.len());
        assert_eq!(store.delete_agent(agent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_exact_checks_every_id_first() {
        let store = store().await;
        let agent = AgentId::random();
        let stored = memories(agent, 2);
        store.insert_many(&stored).await.unwrap();

        let err = store
            .delete_exact(agent, &[stored[0].id(), MemoryId::generate()])
            .await
            .expect_err("unknown id");
        assert!(matches!(err, MemoryError::NotFound { .. }));
        assert!(store.find_one(agent, stored[0].id()).await.unwrap().is_some());

        let removed = store
            .delete_exact(agent, &[stored[0].id(), stored[1].id()])
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.delete_agent(agent).await.unwrap(), 0);
    }
}
