//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `threadline-core` using sqlx with split
//! read/write pools. State and metadata are stored as JSON text; writes
//! upsert on `(thread_id, revision_id)` in a single statement, so readers
//! see either the previous or the new row, never a partial one.

use chrono::{DateTime, Utc};
use sqlx::Row;

use threadline_core::checkpoint::CheckpointStore;
use threadline_types::checkpoint::{
    Checkpoint, ConversationState, RevisionId, RevisionSummary, STATE_VERSION, ThreadId,
};
use threadline_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url`, running migrations.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = DatabasePool::new(database_url).await.map_err(|e| {
            tracing::error!(error = %e, "failed to open checkpoint database");
            RepositoryError::Connection
        })?;
        Ok(Self::new(pool))
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn decode_state(raw: &str) -> Result<ConversationState, RepositoryError> {
    let state: ConversationState = serde_json::from_str(raw)
        .map_err(|e| RepositoryError::Serialization(format!("invalid state: {e}")))?;
    if state.version > STATE_VERSION {
        return Err(RepositoryError::Serialization(format!(
            "state version {} is newer than supported version {STATE_VERSION}",
            state.version
        )));
    }
    Ok(state)
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let thread_id: String = row
        .try_get("thread_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let revision_id: String = row
        .try_get("revision_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let parent_revision_id: Option<String> = row
        .try_get("parent_revision_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let state: String = row
        .try_get("state")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let metadata: String = row
        .try_get("metadata")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(Checkpoint {
        thread_id: ThreadId::new(thread_id),
        revision_id: RevisionId::new(revision_id),
        parent_revision_id: parent_revision_id.map(RevisionId::new),
        state: decode_state(&state)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| RepositoryError::Serialization(format!("invalid metadata: {e}")))?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<RevisionSummary, RepositoryError> {
    let revision_id: String = row
        .try_get("revision_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let parent_revision_id: Option<String> = row
        .try_get("parent_revision_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(RevisionSummary {
        revision_id: RevisionId::new(revision_id),
        parent_revision_id: parent_revision_id.map(RevisionId::new),
        created_at: parse_datetime(&created_at)?,
    })
}

impl CheckpointStore for SqliteCheckpointStore {
    async fn get_latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT thread_id, revision_id, parent_revision_id, state, metadata, created_at
               FROM checkpoints
               WHERE thread_id = ?
               ORDER BY revision_id DESC
               LIMIT 1"#,
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn get(
        &self,
        thread_id: &ThreadId,
        revision_id: &RevisionId,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT thread_id, revision_id, parent_revision_id, state, metadata, created_at
               FROM checkpoints
               WHERE thread_id = ? AND revision_id = ?"#,
        )
        .bind(thread_id.as_str())
        .bind(revision_id.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn list_revisions(
        &self,
        thread_id: &ThreadId,
        limit: u32,
    ) -> Result<Vec<RevisionSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT revision_id, parent_revision_id, created_at
               FROM checkpoints
               WHERE thread_id = ?
               ORDER BY revision_id DESC
               LIMIT ?"#,
        )
        .bind(thread_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(row_to_summary).collect()
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint, RepositoryError> {
        let stored = Checkpoint {
            created_at: Utc::now(),
            ..checkpoint
        };
        let state = serde_json::to_string(&stored.state)
            .map_err(|e| RepositoryError::Serialization(format!("failed to serialize state: {e}")))?;
        let metadata = serde_json::to_string(&stored.metadata).map_err(|e| {
            RepositoryError::Serialization(format!("failed to serialize metadata: {e}"))
        })?;

        sqlx::query(
            r#"INSERT INTO checkpoints (thread_id, revision_id, parent_revision_id, state, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (thread_id, revision_id) DO UPDATE SET
                   parent_revision_id = excluded.parent_revision_id,
                   state = excluded.state,
                   metadata = excluded.metadata,
                   created_at = excluded.created_at"#,
        )
        .bind(stored.thread_id.as_str())
        .bind(stored.revision_id.as_str())
        .bind(stored.parent_revision_id.as_ref().map(RevisionId::as_str))
        .bind(&state)
        .bind(&metadata)
        .bind(format_datetime(&stored.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            thread_id = %stored.thread_id,
            revision_id = %stored.revision_id,
            messages = stored.state.messages.len(),
            "checkpoint written"
        );
        Ok(stored)
    }
}
