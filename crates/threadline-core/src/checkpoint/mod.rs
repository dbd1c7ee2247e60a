//! Checkpoint store trait definition (port).
//!
//! Defines the storage interface for per-thread conversation checkpoints.
//! The infrastructure layer (threadline-infra) implements it with SQLite;
//! [`memory::InMemoryCheckpointStore`] serves embedding and tests.

pub mod memory;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use threadline_types::checkpoint::{Checkpoint, RevisionId, RevisionSummary, ThreadId};
use threadline_types::error::{CompactionError, RepositoryError};
use threadline_types::message::Message;

/// Transformation applied to a loaded message sequence before it is
/// handed to the caller.
pub trait MessageReducer: Send + Sync {
    fn reduce(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<Vec<Message>, CompactionError>> + Send;
}

/// Repository trait for conversation checkpoints.
///
/// Checkpoints are keyed by `(thread_id, revision_id)`. Revision ids sort
/// in creation order, so the greatest id of a thread is its latest state.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint of a thread, or `None` if it was never written.
    fn get_latest(
        &self,
        thread_id: &ThreadId,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// One specific revision of a thread.
    fn get(
        &self,
        thread_id: &ThreadId,
        revision_id: &RevisionId,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Revision history of a thread, newest first.
    fn list_revisions(
        &self,
        thread_id: &ThreadId,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<RevisionSummary>, RepositoryError>> + Send;

    /// Upsert by `(thread_id, revision_id)`. Returns the checkpoint as stored.
    fn put(
        &self,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = Result<Checkpoint, RepositoryError>> + Send;

    /// Latest checkpoint with `reducer` applied to its messages.
    ///
    /// A reducer error or panic leaves the messages unreduced; only storage
    /// errors are returned.
    fn get_latest_with<R: MessageReducer>(
        &self,
        thread_id: &ThreadId,
        reducer: &R,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
        async move {
            let Some(mut checkpoint) = self.get_latest(thread_id).await? else {
                return Ok(None);
            };
            let messages = std::mem::take(&mut checkpoint.state.messages);
            checkpoint.state.messages = apply_reducer(reducer, thread_id, messages).await;
            Ok(Some(checkpoint))
        }
    }
}

async fn apply_reducer<R: MessageReducer>(
    reducer: &R,
    thread_id: &ThreadId,
    messages: Vec<Message>,
) -> Vec<Message> {
    match AssertUnwindSafe(async { reducer.reduce(&messages).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(reduced)) => reduced,
        Ok(Err(e)) => {
            tracing::warn!(%thread_id, error = %e, "reducer failed, using unreduced history");
            messages
        }
        Err(_) => {
            tracing::error!(%thread_id, "reducer panicked, using unreduced history");
            messages
        }
    }
}
