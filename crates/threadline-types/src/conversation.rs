//! Chat-surface addressing and inbound request types.
//!
//! The chat surface addresses a conversation by channel, with an optional
//! sub-thread anchor. Thread identity and the UI anchor used for status
//! display are derived from that address.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checkpoint::ThreadId;

/// Where an inbound message was posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAddress {
    pub channel: String,
    /// Timestamp of the triggering message itself.
    pub message_ts: Option<String>,
    /// Anchor of the sub-thread the message belongs to, if any.
    pub thread_ts: Option<String>,
}

impl ConversationAddress {
    /// Derive the checkpoint thread id: sub-thread anchor if present,
    /// otherwise the channel.
    pub fn thread_id(&self, prefix: &str) -> ThreadId {
        let anchor = self.thread_ts.as_deref().unwrap_or(&self.channel);
        ThreadId::new(format!("{prefix}_{anchor}"))
    }

    /// Anchor for status and replies: the sub-thread if any, else the
    /// triggering message so the transport can reference it before a
    /// thread exists.
    pub fn ui_anchor(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.message_ts.as_deref())
    }

    /// Transport destination bound to the UI anchor.
    pub fn destination(&self) -> Destination {
        Destination {
            channel: self.channel.clone(),
            anchor: self.ui_anchor().map(str::to_string),
        }
    }
}

/// Addressable location in the external transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub channel: String,
    pub anchor: Option<String>,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.anchor {
            Some(anchor) => write!(f, "{}/{}", self.channel, anchor),
            None => f.write_str(&self.channel),
        }
    }
}

/// Identity of the user (and workspace) that issued a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: Option<String>,
    pub team_id: Option<String>,
}

/// How a request reached the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Mention,
    DirectMessage,
    Api,
}

/// Closed set of agent configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    General,
    Automation,
    Reviewer,
}

impl Persona {
    /// Persona selected for a trigger when none is requested explicitly.
    pub fn for_trigger(trigger: TriggerType) -> Self {
        match trigger {
            TriggerType::Api => Persona::Automation,
            TriggerType::Mention | TriggerType::DirectMessage => Persona::General,
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persona::General => write!(f, "general"),
            Persona::Automation => write!(f, "automation"),
            Persona::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// One inbound request to be handled as a single turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRequest {
    pub address: ConversationAddress,
    pub text: String,
    #[serde(default)]
    pub requester: Requester,
    pub trigger: TriggerType,
    /// Explicit persona; derived from `trigger` when absent.
    #[serde(default)]
    pub persona: Option<Persona>,
}

impl InboundRequest {
    pub fn persona(&self) -> Persona {
        self.persona
            .unwrap_or_else(|| Persona::for_trigger(self.trigger))
    }
}
