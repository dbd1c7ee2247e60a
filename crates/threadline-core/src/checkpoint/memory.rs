//! In-memory checkpoint store.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::Utc;
use dashmap::DashMap;
use threadline_types::checkpoint::{Checkpoint, RevisionId, RevisionSummary, ThreadId};
use threadline_types::error::RepositoryError;

use super::CheckpointStore;

/// Process-local [`CheckpointStore`] with the same upsert and
/// latest-by-revision semantics as the SQLite store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    threads: DashMap<ThreadId, BTreeMap<RevisionId, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of revisions stored for a thread.
    pub fn revision_count(&self, thread_id: &ThreadId) -> usize {
        self.threads.get(thread_id).map_or(0, |revisions| revisions.len())
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get_latest(
        &self,
        thread_id: &ThreadId,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
        let latest = self
            .threads
            .get(thread_id)
            .and_then(|revisions| revisions.values().next_back().cloned());
        async move { Ok(latest) }
    }

    fn get(
        &self,
        thread_id: &ThreadId,
        revision_id: &RevisionId,
    ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
        let found = self
            .threads
            .get(thread_id)
            .and_then(|revisions| revisions.get(revision_id).cloned());
        async move { Ok(found) }
    }

    fn list_revisions(
        &self,
        thread_id: &ThreadId,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<RevisionSummary>, RepositoryError>> + Send {
        let summaries: Vec<RevisionSummary> = self
            .threads
            .get(thread_id)
            .map(|revisions| {
                revisions
                    .values()
                    .rev()
                    .take(limit as usize)
                    .map(|cp| RevisionSummary {
                        revision_id: cp.revision_id.clone(),
                        parent_revision_id: cp.parent_revision_id.clone(),
                        created_at: cp.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        async move { Ok(summaries) }
    }

    fn put(
        &self,
        mut checkpoint: Checkpoint,
    ) -> impl Future<Output = Result<Checkpoint, RepositoryError>> + Send {
        checkpoint.created_at = Utc::now();
        self.threads
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .insert(checkpoint.revision_id.clone(), checkpoint.clone());
        async move { Ok(checkpoint) }
    }
}
