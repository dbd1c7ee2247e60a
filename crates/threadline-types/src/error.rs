use thiserror::Error;

use crate::llm::LlmError;

/// Errors from repository operations (used by trait definitions in threadline-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by the external chat transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the failure is transient throttling worth retrying.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited { .. })
    }
}

/// Errors from an agent run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent execution failed: {0}")]
    Execution(String),

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u32),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Errors from context compaction. Never surfaced to the end user.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("summarization failed: {0}")]
    Summarization(#[from] LlmError),

    #[error("summarization returned an empty summary")]
    EmptySummary,
}

/// Misuse of a streaming emitter's lifecycle.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("emitter already started")]
    AlreadyStarted,

    #[error("emitter not started")]
    NotStarted,

    #[error("emitter already stopped")]
    Stopped,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Turn-fatal errors from the session dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("conversation state unavailable: {0}")]
    Storage(#[from] RepositoryError),

    #[error("agent failed: {0}")]
    Agent(#[from] AgentError),

    #[error("stream emitter error: {0}")]
    Emitter(#[from] EmitterError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DispatchError {
    /// Message shown to the end user when the turn is aborted.
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::Storage(_) => {
                "Sorry, I couldn't load or save this conversation. Please try again.".to_string()
            }
            DispatchError::Agent(err) => format!("Error processing request: {err}"),
            DispatchError::Emitter(_) => {
                "Sorry, something went wrong while streaming the response.".to_string()
            }
            DispatchError::Config(_) => {
                "Sorry, this bot is misconfigured. Please contact an administrator.".to_string()
            }
        }
    }
}
