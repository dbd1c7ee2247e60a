//! Checkpoint domain types.
//!
//! A conversation thread is a chain of checkpoints keyed by
//! `(thread_id, revision_id)`. Revision ids are opaque, time-sortable
//! strings (UUID v7), so the greatest id is the latest revision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::message::Message;

/// Current version of the serialized [`ConversationState`] layout.
pub const STATE_VERSION: u32 = 1;

/// Current version of the checkpoint metadata layout.
pub const METADATA_VERSION: u32 = 1;

/// Stable identity of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque revision identifier, monotonic per thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Generate a fresh, time-ordered revision id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized conversation state held by a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default = "default_state_version")]
    pub version: u32,
    pub messages: Vec<Message>,
}

fn default_state_version() -> u32 {
    STATE_VERSION
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            version: STATE_VERSION,
            messages,
        }
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// One persisted revision of a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub revision_id: RevisionId,
    /// `None` only for the first revision of a thread.
    pub parent_revision_id: Option<RevisionId>,
    pub state: ConversationState,
    /// Free-form metadata, versioned independently of `state`.
    pub metadata: serde_json::Value,
    /// Assigned by the store when the checkpoint is written.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build the next revision of a thread, parented on `parent` if any.
    pub fn next(
        thread_id: ThreadId,
        parent: Option<&Checkpoint>,
        state: ConversationState,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            thread_id,
            revision_id: RevisionId::generate(),
            parent_revision_id: parent.map(|p| p.revision_id.clone()),
            state,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Turn counter recorded in the metadata, 0 when absent.
    pub fn step(&self) -> u64 {
        self.metadata
            .get("step")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }
}

/// Lightweight listing entry for a thread's revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub revision_id: RevisionId,
    pub parent_revision_id: Option<RevisionId>,
    pub created_at: DateTime<Utc>,
}
