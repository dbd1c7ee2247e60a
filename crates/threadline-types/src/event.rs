//! Events produced by an agent run and status shapes for the transport.
//!
//! `AgentEvent` is the tagged record the agent hands to the dispatcher over
//! an async channel, one per step, tool start, or output token. The stream
//! is finite and ends with `Done` (or an error).

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Events emitted during a single agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A tool invocation has started.
    ToolStarted { name: String },

    /// A sub-agent invocation has started.
    SubInvocationStarted { name: String },

    /// A chunk of model output.
    Token {
        content: String,
        /// Side-channel reasoning text, never shown as answer output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },

    /// The run finished. Carries the full conversation to checkpoint.
    Done { messages: Vec<Message> },
}

impl AgentEvent {
    pub fn token(content: impl Into<String>) -> Self {
        AgentEvent::Token {
            content: content.into(),
            reasoning: None,
        }
    }
}

/// Transient assistant status shown next to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AssistantStatus {
    /// Free text; an empty string clears the indicator.
    Text(String),
    /// Rotating loading messages for a discrete state change.
    Loading(Vec<String>),
}

impl AssistantStatus {
    pub fn cleared() -> Self {
        AssistantStatus::Text(String::new())
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, AssistantStatus::Text(text) if text.is_empty())
    }
}
