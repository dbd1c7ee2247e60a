//! Agent port for Threadline.
//!
//! The agent runs one turn against a message history and hands its output
//! back as a finite stream of tagged events over an async channel:
//! - `Agent`: trait implemented by the LLM agent runtime
//! - `AgentRequest`: history, step limit and explicit request context
//! - `AgentEventStream` / `AgentEventSender`: the producer/consumer handoff

pub mod request_context;

use tokio::sync::mpsc;

use threadline_types::checkpoint::ThreadId;
use threadline_types::conversation::Persona;
use threadline_types::error::AgentError;
use threadline_types::event::AgentEvent;
use threadline_types::message::Message;

use self::request_context::RequestContext;

/// Input for a single agent turn.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Checkpoint key of the conversation.
    pub thread_id: ThreadId,
    /// Loaded (possibly compacted) history followed by the new user message.
    pub messages: Vec<Message>,
    /// Upper bound on agent steps (model calls plus tool calls).
    pub step_limit: u32,
    pub model: String,
    pub persona: Persona,
    /// Requester and destination identity for tools that need it.
    pub context: RequestContext,
}

/// Runs agent turns.
///
/// `run` starts the turn and returns immediately; the implementation
/// produces events on its own task until it sends `Done` or an error, or
/// the receiving side is dropped.
pub trait Agent: Send + Sync {
    fn run(&self, request: AgentRequest) -> AgentEventStream;
}

/// Producing half of an agent event channel.
#[derive(Debug, Clone)]
pub struct AgentEventSender {
    tx: mpsc::Sender<Result<AgentEvent, AgentError>>,
}

impl AgentEventSender {
    /// Send an event. Returns `false` once the consumer has gone away.
    pub async fn send(&self, event: AgentEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    /// End the stream with an error.
    pub async fn fail(&self, error: AgentError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }
}

/// Consuming half of an agent event channel. Finite and not restartable.
#[derive(Debug)]
pub struct AgentEventStream {
    rx: mpsc::Receiver<Result<AgentEvent, AgentError>>,
}

impl AgentEventStream {
    pub fn channel(capacity: usize) -> (AgentEventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (AgentEventSender { tx }, Self { rx })
    }

    /// A stream that yields the given items and then ends.
    pub fn from_results(items: Vec<Result<AgentEvent, AgentError>>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item, so this cannot fail.
            let _ = tx.try_send(item);
        }
        Self { rx }
    }

    /// Next event, or `None` once every sender is dropped.
    pub async fn next(&mut self) -> Option<Result<AgentEvent, AgentError>> {
        self.rx.recv().await
    }
}
