//! Blocking checkpoint store facade.
//!
//! Synchronous callers get the same store through `BlockingCheckpointStore`,
//! which drives the async implementation on a private current-thread
//! runtime. There is one storage code path; this type only waits on it.

use std::path::Path;

use tokio::runtime::{Builder, Runtime};

use threadline_core::checkpoint::{CheckpointStore, MessageReducer};
use threadline_types::checkpoint::{Checkpoint, RevisionId, RevisionSummary, ThreadId};
use threadline_types::error::RepositoryError;

use crate::config::default_database_url;
use crate::sqlite::checkpoint::SqliteCheckpointStore;

/// Synchronous wrapper around an async [`CheckpointStore`].
///
/// Every method blocks the calling thread and panics if called from inside
/// an async runtime; async callers use the wrapped store directly.
pub struct BlockingCheckpointStore<S> {
    store: S,
    runtime: Runtime,
}

impl BlockingCheckpointStore<SqliteCheckpointStore> {
    /// Open the SQLite store at `database_url` on a private runtime.
    pub fn open(database_url: &str) -> Result<Self, RepositoryError> {
        let runtime = build_runtime()?;
        let store = runtime.block_on(SqliteCheckpointStore::connect(database_url))?;
        Ok(Self { store, runtime })
    }

    /// Open the default database inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> Result<Self, RepositoryError> {
        Self::open(&default_database_url(data_dir))
    }
}

impl<S: CheckpointStore> BlockingCheckpointStore<S> {
    /// Wrap an existing store. Stores holding runtime-bound resources (such
    /// as connection pools) should be built with [`open`](Self::open).
    pub fn new(store: S) -> Result<Self, RepositoryError> {
        Ok(Self {
            store,
            runtime: build_runtime()?,
        })
    }

    /// The wrapped async store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn get_latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        self.runtime.block_on(self.store.get_latest(thread_id))
    }

    pub fn get_latest_with<R: MessageReducer>(
        &self,
        thread_id: &ThreadId,
        reducer: &R,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        self.runtime
            .block_on(self.store.get_latest_with(thread_id, reducer))
    }

    pub fn get(
        &self,
        thread_id: &ThreadId,
        revision_id: &RevisionId,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        self.runtime.block_on(self.store.get(thread_id, revision_id))
    }

    pub fn list_revisions(
        &self,
        thread_id: &ThreadId,
        limit: u32,
    ) -> Result<Vec<RevisionSummary>, RepositoryError> {
        self.runtime
            .block_on(self.store.list_revisions(thread_id, limit))
    }

    pub fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint, RepositoryError> {
        self.runtime.block_on(self.store.put(checkpoint))
    }
}

fn build_runtime() -> Result<Runtime, RepositoryError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "failed to build checkpoint runtime");
            RepositoryError::Connection
        })
}
