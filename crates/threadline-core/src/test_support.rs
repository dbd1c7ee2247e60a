//! Hand-written port implementations shared by unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use threadline_types::conversation::Destination;
use threadline_types::error::{AgentError, TransportError};
use threadline_types::event::{AgentEvent, AssistantStatus};
use threadline_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason,
    TokenCount, Usage,
};
use threadline_types::message::Message;

use crate::agent::{Agent, AgentEventStream, AgentRequest};
use crate::llm::provider::LlmProvider;
use crate::transport::{ChatTransport, TransportStream};

// ---------------------------------------------------------------------------
// LLM provider
// ---------------------------------------------------------------------------

/// Provider answering completions from a script. Clones share state.
#[derive(Clone)]
pub struct ScriptedProvider {
    capabilities: ProviderCapabilities,
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    native_count: Option<u32>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                native_token_count: false,
            },
            replies: Arc::new(Mutex::new(VecDeque::new())),
            native_count: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(summary: &str) -> Self {
        let provider = Self::new();
        provider.push_reply(Ok(summary.to_string()));
        provider
    }

    pub fn failing(message: &str) -> Self {
        let provider = Self::new();
        provider.push_reply(Err(message.to_string()));
        provider
    }

    /// Report `tokens` for every count request through a native tokenizer.
    pub fn with_native_count(mut self, tokens: u32) -> Self {
        self.capabilities.native_token_count = true;
        self.native_count = Some(tokens);
        self
    }

    pub fn push_reply(&self, reply: Result<String, String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn completion_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, LlmError>> + Send {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted reply".to_string()));
        let model = request.model.clone();
        async move {
            match reply {
                Ok(content) => Ok(CompletionResponse {
                    id: "resp-1".to_string(),
                    content,
                    model,
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::default(),
                }),
                Err(message) => Err(LlmError::Provider { message }),
            }
        }
    }

    fn count_tokens(
        &self,
        _request: &CompletionRequest,
    ) -> impl Future<Output = Result<TokenCount, LlmError>> + Send {
        let count = self.native_count;
        async move {
            count
                .map(|input_tokens| TokenCount { input_tokens })
                .ok_or_else(|| LlmError::TokenCountUnsupported("scripted".to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Chat transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Open(Destination),
    Append(String),
    Close,
    Status(AssistantStatus),
    Message(String),
}

/// Transport that records every call. Clones share the recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    failing_appends: Arc<AtomicUsize>,
    failing_messages: Arc<AtomicUsize>,
    failing_opens: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` stream appends fail with a rate limit.
    pub fn fail_next_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` standalone messages fail with a network error.
    pub fn fail_next_messages(&self, n: usize) {
        self.failing_messages.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` stream opens fail with a network error.
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn appends(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Append(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<AssistantStatus> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct RecordingStream {
    transport: RecordingTransport,
}

impl TransportStream for RecordingStream {
    fn append(&mut self, text: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
        let result = if take_failure(&self.transport.failing_appends) {
            Err(TransportError::RateLimited {
                retry_after_ms: None,
            })
        } else {
            self.transport.record(TransportCall::Append(text.to_string()));
            Ok(())
        };
        async move { result }
    }

    fn close(
        self,
        _trailing: Option<Vec<serde_json::Value>>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.transport.record(TransportCall::Close);
        async { Ok(()) }
    }
}

impl ChatTransport for RecordingTransport {
    type Stream = RecordingStream;

    fn open_stream(
        &self,
        destination: &Destination,
    ) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send {
        let result = if take_failure(&self.failing_opens) {
            Err(TransportError::Network("stream refused".to_string()))
        } else {
            self.record(TransportCall::Open(destination.clone()));
            Ok(RecordingStream {
                transport: self.clone(),
            })
        };
        async move { result }
    }

    fn set_status(
        &self,
        _destination: &Destination,
        status: &AssistantStatus,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.record(TransportCall::Status(status.clone()));
        async { Ok(()) }
    }

    fn send_message(
        &self,
        _destination: &Destination,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let result = if take_failure(&self.failing_messages) {
            Err(TransportError::Network("connection reset".to_string()))
        } else {
            self.record(TransportCall::Message(text.to_string()));
            Ok(())
        };
        async move { result }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// One scripted agent action.
#[derive(Debug, Clone)]
pub enum Step {
    Event(AgentEvent),
    /// Stream a token.
    Token(String),
    /// Finish with the request history plus this assistant reply.
    Reply(String),
    /// Fail the run.
    Fail(String),
    /// Pause before the next step.
    Sleep(Duration),
}

/// Agent that plays back a script on a spawned task.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    steps: Vec<Step>,
    requests: Arc<Mutex<Vec<AgentRequest>>>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            requests: Arc::default(),
        }
    }

    /// Streams `reply` as one token and finishes with it.
    pub fn replying(reply: &str) -> Self {
        Self::new(vec![Step::Token(reply.to_string()), Step::Reply(reply.to_string())])
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Agent for ScriptedAgent {
    fn run(&self, request: AgentRequest) -> AgentEventStream {
        self.requests.lock().unwrap().push(request.clone());
        let (tx, stream) = AgentEventStream::channel(8);
        let steps = self.steps.clone();
        tokio::spawn(async move {
            for step in steps {
                let delivered = match step {
                    Step::Event(event) => tx.send(event).await,
                    Step::Token(content) => tx.send(AgentEvent::token(content)).await,
                    Step::Reply(reply) => {
                        let mut messages = request.messages.clone();
                        messages.push(Message::assistant(reply));
                        tx.send(AgentEvent::Done { messages }).await
                    }
                    Step::Fail(message) => tx.fail(AgentError::Execution(message)).await,
                    Step::Sleep(duration) => {
                        tokio::time::sleep(duration).await;
                        true
                    }
                };
                if !delivered {
                    break;
                }
            }
        });
        stream
    }
}
