//! Request context for one dispatched turn.
//!
//! `RequestContext` carries the identity of the turn (request id, thread,
//! destination, requester, persona) explicitly through the dispatcher and
//! into the agent, so tools receive it as a parameter.

use uuid::Uuid;

use threadline_types::checkpoint::ThreadId;
use threadline_types::conversation::{Destination, InboundRequest, Persona, Requester, TriggerType};

#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Unique identifier for this request.
    pub request_id: Uuid,
    pub thread_id: ThreadId,
    /// Where status and replies for this turn are shown.
    pub destination: Destination,
    pub requester: Requester,
    pub trigger: TriggerType,
    pub persona: Persona,
}

impl RequestContext {
    /// Derive the context of an inbound request.
    pub fn for_request(request: &InboundRequest, thread_prefix: &str) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            thread_id: request.address.thread_id(thread_prefix),
            destination: request.address.destination(),
            requester: request.requester.clone(),
            trigger: request.trigger,
            persona: request.persona(),
        }
    }

    /// Checkpoint metadata describing this turn.
    pub fn metadata(&self, step: u64) -> serde_json::Value {
        serde_json::json!({
            "version": threadline_types::checkpoint::METADATA_VERSION,
            "step": step,
            "request_id": self.request_id,
            "persona": self.persona,
            "trigger": self.trigger,
            "requester": self.requester,
        })
    }
}
