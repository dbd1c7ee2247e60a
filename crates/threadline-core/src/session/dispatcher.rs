//! Session dispatcher -- one inbound request, one turn.
//!
//! `SessionDispatcher::dispatch` derives the request context, loads the
//! thread's latest checkpoint (compacted at load), runs the agent, routes
//! its events through a [`StreamingEmitter`] and saves the next checkpoint.
//!
//! Only storage and agent failures reach the user, as a best-effort
//! message to the UI anchor. The emitter is stopped on every exit path.

use std::sync::Arc;

use tracing::Instrument;

use threadline_types::checkpoint::{Checkpoint, ConversationState, RevisionId, ThreadId};
use threadline_types::config::{BotConfig, ConcurrencyPolicy};
use threadline_types::conversation::{Destination, InboundRequest};
use threadline_types::error::DispatchError;
use threadline_types::event::{AgentEvent, AssistantStatus};
use threadline_types::message::Message;

use crate::agent::request_context::RequestContext;
use crate::agent::{Agent, AgentRequest};
use crate::checkpoint::CheckpointStore;
use crate::compaction::{CompactingReducer, CompactionNotice, ContextCompactor};
use crate::llm::registry::ModelRegistry;
use crate::reasoning::{ReasoningMarker, reasoning_preview};
use crate::retry::retry_on_rate_limit;
use crate::stream::{EmitterSettings, StreamingEmitter};
use crate::transport::{ChatTransport, NoticeSink};

use super::thread_locks::ThreadLocks;

const INITIAL_STATUS: [&str; 2] = ["Analyzing your request...", "Gathering context..."];
const MARKER_STATUS: &str = "Analyzing core logic...";

/// What a completed turn left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub thread_id: ThreadId,
    /// Revision written at the end of the turn.
    pub revision_id: RevisionId,
    /// Whether any answer text was shown.
    pub response_started: bool,
    pub emitted_chars: usize,
}

/// Orchestrates turns over a checkpoint store, an agent and a transport.
pub struct SessionDispatcher<S, A, T> {
    store: S,
    agent: A,
    transport: Arc<T>,
    compactor: ContextCompactor,
    registry: ModelRegistry,
    config: BotConfig,
    marker: ReasoningMarker,
    locks: ThreadLocks,
}

impl<S, A, T> SessionDispatcher<S, A, T>
where
    S: CheckpointStore,
    A: Agent,
    T: ChatTransport + 'static,
{
    /// Fails only if the configured reasoning marker is unusable.
    pub fn new(
        store: S,
        agent: A,
        transport: Arc<T>,
        compactor: ContextCompactor,
        config: BotConfig,
    ) -> Result<Self, DispatchError> {
        let marker = ReasoningMarker::new(&config.reasoning_marker)
            .map_err(|e| DispatchError::Config(format!("reasoning_marker: {e}")))?;
        let registry = ModelRegistry::from_config(&config);

        Ok(Self {
            store,
            agent,
            transport,
            compactor,
            registry,
            config,
            marker,
            locks: ThreadLocks::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Handle one inbound request end to end.
    pub async fn dispatch(&self, request: InboundRequest) -> Result<TurnOutcome, DispatchError> {
        let ctx = RequestContext::for_request(&request, &self.config.thread_id_prefix);
        let span = tracing::info_span!(
            "dispatch_turn",
            thread_id = %ctx.thread_id,
            request_id = %ctx.request_id,
            persona = %ctx.persona,
        );
        self.dispatch_in_context(ctx, request.text)
            .instrument(span)
            .await
    }

    async fn dispatch_in_context(
        &self,
        ctx: RequestContext,
        text: String,
    ) -> Result<TurnOutcome, DispatchError> {
        let turn_lock = match self.config.concurrency {
            ConcurrencyPolicy::SerializePerThread => Some(self.locks.acquire(&ctx.thread_id).await),
            ConcurrencyPolicy::LastWriteWins => None,
        };

        let mut emitter = StreamingEmitter::new(
            Arc::clone(&self.transport),
            self.marker.clone(),
            EmitterSettings::from_config(&self.config),
        );
        let result = self.run_turn(&ctx, text, &mut emitter).await;
        emitter.stop().await;
        drop(turn_lock);
        self.locks.prune();

        match result {
            Ok(stored) => {
                let outcome = TurnOutcome {
                    thread_id: stored.thread_id,
                    revision_id: stored.revision_id,
                    response_started: emitter.response_started(),
                    emitted_chars: emitter.emitted_text().chars().count(),
                };
                tracing::info!(
                    revision_id = %outcome.revision_id,
                    emitted_chars = outcome.emitted_chars,
                    "turn complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                self.send_error_notice(&ctx.destination, &e).await;
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        ctx: &RequestContext,
        text: String,
        emitter: &mut StreamingEmitter<T>,
    ) -> Result<Checkpoint, DispatchError> {
        if let Err(e) = emitter.start(ctx.destination.clone()).await {
            tracing::warn!(error = %e, "stream not opened, reply will be posted when done");
        }
        emitter
            .update_status(AssistantStatus::Loading(
                INITIAL_STATUS.iter().map(|s| s.to_string()).collect(),
            ))
            .await;

        let model = self.config.model_for(ctx.persona).to_string();
        let budget = self.registry.budget_for(&model, &self.config);
        let sink: Arc<dyn NoticeSink> = self.transport.clone();
        let reducer = CompactingReducer::new(&self.compactor, budget).with_notice(
            CompactionNotice::new(sink, ctx.destination.clone(), self.config.retry.clone()),
        );

        let previous = self
            .store
            .get_latest_with(&ctx.thread_id, &reducer)
            .await?;
        let mut messages = previous
            .as_ref()
            .map(|cp| cp.state.messages.clone())
            .unwrap_or_default();
        messages.push(Message::user(text));
        tracing::debug!(
            history_len = messages.len(),
            resumed = previous.is_some(),
            "history loaded"
        );

        let request = AgentRequest {
            thread_id: ctx.thread_id.clone(),
            messages: messages.clone(),
            step_limit: self.config.step_limit_for(ctx.persona),
            model,
            persona: ctx.persona,
            context: ctx.clone(),
        };
        let mut events = self.agent.run(request);
        let mut completed = None;
        let mut failure = None;

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    failure = Some(DispatchError::from(e));
                    break;
                }
            };
            match event {
                AgentEvent::ToolStarted { name } => {
                    if !emitter.response_started() {
                        emitter
                            .update_status(AssistantStatus::Loading(vec![format!(
                                "Running tool: {name}"
                            )]))
                            .await;
                    }
                }
                AgentEvent::SubInvocationStarted { name } => {
                    if !emitter.response_started() {
                        emitter
                            .update_status(AssistantStatus::Loading(vec![format!(
                                "Collaborating with agent: {name}"
                            )]))
                            .await;
                    }
                }
                AgentEvent::Token { content, reasoning } => {
                    if let Some(reasoning) = reasoning.filter(|r| !r.trim().is_empty()) {
                        emitter
                            .update_status(AssistantStatus::Text(reasoning_preview(&reasoning)))
                            .await;
                        continue;
                    }
                    if !emitter.response_started()
                        && content.to_lowercase().contains(self.marker.as_str())
                    {
                        emitter
                            .update_status(AssistantStatus::Text(MARKER_STATUS.to_string()))
                            .await;
                    }
                    emitter.push_token(&content).await?;
                }
                AgentEvent::Done { messages } => completed = Some(messages),
            }
        }

        emitter.stop().await;

        // A failed run still keeps the user's message and any shown answer.
        let final_messages = match (completed, &failure) {
            (Some(messages), None) => messages,
            (_, failure) => {
                if failure.is_none() {
                    tracing::warn!("agent stream ended without a final state");
                }
                if !emitter.emitted_text().is_empty() {
                    messages.push(Message::assistant(emitter.emitted_text()));
                }
                messages
            }
        };

        let step = previous.as_ref().map_or(0, Checkpoint::step) + 1;
        let checkpoint = Checkpoint::next(
            ctx.thread_id.clone(),
            previous.as_ref(),
            ConversationState::new(final_messages),
            ctx.metadata(step),
        );
        let saved = self.store.put(checkpoint).await;
        if let Some(e) = failure {
            match saved {
                Ok(stored) => tracing::debug!(
                    revision_id = %stored.revision_id,
                    step,
                    "partial turn saved after agent failure"
                ),
                Err(save_err) => {
                    tracing::warn!(error = %save_err, "partial turn not saved");
                }
            }
            return Err(e);
        }
        let stored = saved?;
        tracing::debug!(revision_id = %stored.revision_id, step, "checkpoint saved");
        Ok(stored)
    }

    /// Tell the user the turn failed. Delivery failures are logged only.
    async fn send_error_notice(&self, destination: &Destination, error: &DispatchError) {
        let text = error.user_message();
        let transport = &*self.transport;
        let body = text.as_str();
        let sent = retry_on_rate_limit(&self.config.retry, "error_notice", move || {
            transport.send_message(destination, body)
        })
        .await;
        if let Err(e) = sent {
            tracing::warn!(%destination, error = %e, "error notice not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use threadline_types::checkpoint::{RevisionSummary, STATE_VERSION};
    use threadline_types::conversation::{ConversationAddress, Requester, TriggerType};
    use threadline_types::error::RepositoryError;

    use crate::checkpoint::memory::InMemoryCheckpointStore;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::test_support::{
        RecordingTransport, ScriptedAgent, ScriptedProvider, Step, TransportCall,
    };

    /// In-memory store whose reads or writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryCheckpointStore,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl CheckpointStore for FlakyStore {
        fn get_latest(
            &self,
            thread_id: &ThreadId,
        ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
            async move {
                if self.fail_reads {
                    return Err(RepositoryError::Connection);
                }
                self.inner.get_latest(thread_id).await
            }
        }

        fn get(
            &self,
            thread_id: &ThreadId,
            revision_id: &RevisionId,
        ) -> impl Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
            self.inner.get(thread_id, revision_id)
        }

        fn list_revisions(
            &self,
            thread_id: &ThreadId,
            limit: u32,
        ) -> impl Future<Output = Result<Vec<RevisionSummary>, RepositoryError>> + Send {
            self.inner.list_revisions(thread_id, limit)
        }

        fn put(
            &self,
            checkpoint: Checkpoint,
        ) -> impl Future<Output = Result<Checkpoint, RepositoryError>> + Send {
            async move {
                if self.fail_writes {
                    return Err(RepositoryError::Query("disk I/O error".to_string()));
                }
                self.inner.put(checkpoint).await
            }
        }
    }

    fn request(text: &str) -> InboundRequest {
        InboundRequest {
            address: ConversationAddress {
                channel: "C1".to_string(),
                message_ts: Some("1700000000.000200".to_string()),
                thread_ts: Some("1700000000.000100".to_string()),
            },
            text: text.to_string(),
            requester: Requester {
                user_id: Some("U1".to_string()),
                team_id: None,
            },
            trigger: TriggerType::Mention,
            persona: None,
        }
    }

    fn thread() -> ThreadId {
        ThreadId::new("chat_1700000000.000100")
    }

    fn dispatcher_with<S: CheckpointStore>(
        store: S,
        agent: &ScriptedAgent,
        transport: &RecordingTransport,
        provider: &ScriptedProvider,
        config: BotConfig,
    ) -> SessionDispatcher<S, ScriptedAgent, RecordingTransport> {
        let compactor =
            ContextCompactor::new(BoxLlmProvider::new(provider.clone()), "moonshotai/kimi-k2.5");
        match SessionDispatcher::new(
            store,
            agent.clone(),
            Arc::new(transport.clone()),
            compactor,
            config,
        ) {
            Ok(dispatcher) => dispatcher,
            Err(e) => panic!("dispatcher: {e}"),
        }
    }

    fn dispatcher<S: CheckpointStore>(
        store: S,
        agent: &ScriptedAgent,
        transport: &RecordingTransport,
    ) -> SessionDispatcher<S, ScriptedAgent, RecordingTransport> {
        dispatcher_with(
            store,
            agent,
            transport,
            &ScriptedProvider::new(),
            BotConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_turn_streams_reply_and_saves_checkpoint() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::replying("Hello there.");
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        let outcome = d.dispatch(request("hi")).await.unwrap();

        assert_eq!(outcome.thread_id, thread());
        assert!(outcome.response_started);
        assert_eq!(outcome.emitted_chars, "Hello there.".len());
        assert_eq!(transport.appends(), vec!["Hello there.".to_string()]);

        let calls = transport.calls();
        assert_eq!(
            calls[0],
            TransportCall::Open(Destination {
                channel: "C1".to_string(),
                anchor: Some("1700000000.000100".to_string()),
            })
        );
        assert!(matches!(&calls[1], TransportCall::Status(AssistantStatus::Loading(m)) if m.len() == 2));
        assert_eq!(calls.last(), Some(&TransportCall::Close));
        assert!(transport.messages().is_empty());

        let saved = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(saved.revision_id, outcome.revision_id);
        assert!(saved.parent_revision_id.is_none());
        assert_eq!(saved.step(), 1);
        assert_eq!(saved.state.version, STATE_VERSION);
        assert_eq!(
            saved.state.messages,
            vec![Message::user("hi"), Message::assistant("Hello there.")]
        );
        assert_eq!(saved.metadata["persona"], "general");
        assert_eq!(saved.metadata["requester"]["user_id"], "U1");
    }

    #[tokio::test]
    async fn test_second_turn_resumes_thread() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::replying("ok");
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        let first = d.dispatch(request("one")).await.unwrap();
        let second = d.dispatch(request("two")).await.unwrap();

        let requests = agent.requests();
        assert_eq!(
            requests[1].messages,
            vec![
                Message::user("one"),
                Message::assistant("ok"),
                Message::user("two"),
            ]
        );
        assert_eq!(requests[1].step_limit, 100);
        assert_eq!(requests[1].context.thread_id, thread());

        let saved = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(saved.revision_id, second.revision_id);
        assert_eq!(saved.parent_revision_id, Some(first.revision_id));
        assert_eq!(saved.step(), 2);
        assert_eq!(saved.state.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_agent_events_drive_status() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::new(vec![
            Step::Event(AgentEvent::ToolStarted {
                name: "grep".to_string(),
            }),
            Step::Event(AgentEvent::SubInvocationStarted {
                name: "reviewer".to_string(),
            }),
            Step::Event(AgentEvent::Token {
                content: String::new(),
                reasoning: Some("checking the logs".to_string()),
            }),
            Step::Token("Found it.".to_string()),
            Step::Event(AgentEvent::ToolStarted {
                name: "late_tool".to_string(),
            }),
            Step::Reply("Found it.".to_string()),
        ]);
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        d.dispatch(request("where is the bug?")).await.unwrap();

        let statuses = transport.statuses();
        assert!(statuses.contains(&AssistantStatus::Loading(vec![
            "Running tool: grep".to_string()
        ])));
        assert!(statuses.contains(&AssistantStatus::Loading(vec![
            "Collaborating with agent: reviewer".to_string()
        ])));
        assert!(statuses.contains(&AssistantStatus::Text(
            "Reasoning: checking the logs...".to_string()
        )));
        assert!(!statuses.contains(&AssistantStatus::Loading(vec![
            "Running tool: late_tool".to_string()
        ])));
        assert_eq!(transport.appends(), vec!["Found it.".to_string()]);
    }

    #[tokio::test]
    async fn test_inline_reasoning_is_hidden() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::new(vec![
            Step::Token("Thought: plan the answer\n".to_string()),
            Step::Token("Answer.".to_string()),
            Step::Reply("Answer.".to_string()),
        ]);
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        d.dispatch(request("q")).await.unwrap();

        assert!(
            transport
                .statuses()
                .contains(&AssistantStatus::Text(MARKER_STATUS.to_string()))
        );
        assert_eq!(transport.appends(), vec!["Answer.".to_string()]);
    }

    #[tokio::test]
    async fn test_storage_read_failure_aborts_turn() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::replying("never");
        let store = FlakyStore {
            fail_reads: true,
            ..Default::default()
        };
        let d = dispatcher(store, &agent, &transport);

        let err = d.dispatch(request("hi")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Storage(_)));
        assert!(agent.requests().is_empty());
        assert_eq!(transport.messages(), vec![err.user_message()]);
        assert!(transport.calls().contains(&TransportCall::Close));
        assert_eq!(d.store().inner.revision_count(&thread()), 0);
    }

    #[tokio::test]
    async fn test_storage_write_failure_is_reported() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::replying("done");
        let store = FlakyStore {
            fail_writes: true,
            ..Default::default()
        };
        let d = dispatcher(store, &agent, &transport);

        let err = d.dispatch(request("hi")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Storage(_)));
        assert_eq!(agent.requests().len(), 1);
        assert_eq!(transport.messages(), vec![err.user_message()]);
    }

    #[tokio::test]
    async fn test_agent_failure_stops_stream_and_keeps_user_turn() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::new(vec![
            Step::Token("Partial".to_string()),
            Step::Fail("model exploded".to_string()),
        ]);
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        let err = d.dispatch(request("hi")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Agent(_)));
        let messages = transport.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Error processing request"));
        assert!(messages[0].contains("model exploded"));
        assert_eq!(transport.appends(), vec!["Partial".to_string()]);
        assert_eq!(transport.calls().last(), Some(&TransportCall::Message(messages[0].clone())));
        assert!(transport.calls().contains(&TransportCall::Close));

        let saved = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(saved.step(), 1);
        assert_eq!(
            saved.state.messages,
            vec![Message::user("hi"), Message::assistant("Partial")]
        );
    }

    #[tokio::test]
    async fn test_agent_failure_before_output_keeps_user_message() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::new(vec![Step::Fail("rate limited upstream".to_string())]);
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        d.dispatch(request("one")).await.unwrap_err();

        let saved = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(saved.state.messages, vec![Message::user("one")]);
    }

    #[tokio::test]
    async fn test_agent_failure_with_failed_save_reports_agent_error() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::new(vec![Step::Fail("model exploded".to_string())]);
        let store = FlakyStore {
            fail_writes: true,
            ..Default::default()
        };
        let d = dispatcher(store, &agent, &transport);

        let err = d.dispatch(request("hi")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Agent(_)));
        assert_eq!(transport.messages(), vec![err.user_message()]);
    }

    #[tokio::test]
    async fn test_refused_stream_still_answers() {
        let transport = RecordingTransport::new();
        transport.fail_next_opens(1);
        let agent = ScriptedAgent::replying("Hello there.");
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        let outcome = d.dispatch(request("hi")).await.unwrap();

        assert!(outcome.response_started);
        assert!(transport.appends().is_empty());
        assert_eq!(transport.messages(), vec!["Hello there.".to_string()]);
        let saved = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(
            saved.state.messages,
            vec![Message::user("hi"), Message::assistant("Hello there.")]
        );
    }

    #[tokio::test]
    async fn test_error_notice_failure_is_swallowed() {
        let transport = RecordingTransport::new();
        transport.fail_next_messages(1);
        let agent = ScriptedAgent::new(vec![Step::Fail("tool crashed".to_string())]);
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        let err = d.dispatch(request("hi")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Agent(_)));
        assert!(transport.messages().is_empty());
    }

    #[tokio::test]
    async fn test_stream_without_final_state_saves_emitted_reply() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::new(vec![Step::Token("Half an answer".to_string())]);
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        d.dispatch(request("hi")).await.unwrap();

        let saved = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(
            saved.state.messages,
            vec![Message::user("hi"), Message::assistant("Half an answer")]
        );
    }

    #[tokio::test]
    async fn test_invalid_marker_is_a_config_error() {
        let config = BotConfig {
            reasoning_marker: "   ".to_string(),
            ..BotConfig::default()
        };
        let compactor = ContextCompactor::new(BoxLlmProvider::new(ScriptedProvider::new()), "m");
        let result = SessionDispatcher::new(
            InMemoryCheckpointStore::new(),
            ScriptedAgent::default(),
            Arc::new(RecordingTransport::new()),
            compactor,
            config,
        );
        assert!(matches!(result, Err(DispatchError::Config(_))));
    }

    fn slow_agent(reply: &str) -> ScriptedAgent {
        ScriptedAgent::new(vec![
            Step::Sleep(Duration::from_millis(50)),
            Step::Token(reply.to_string()),
            Step::Reply(reply.to_string()),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_turns_last_write_wins() {
        let transport = RecordingTransport::new();
        let agent = slow_agent("ok");
        let d = dispatcher(InMemoryCheckpointStore::new(), &agent, &transport);

        let (a, b) = tokio::join!(d.dispatch(request("first")), d.dispatch(request("second")));
        let (a, b) = (a.unwrap(), b.unwrap());

        // Both turns loaded the empty thread, so neither sees the other.
        assert_eq!(d.store().revision_count(&thread()), 2);
        for outcome in [&a, &b] {
            let cp = d
                .store()
                .get(&thread(), &outcome.revision_id)
                .await
                .unwrap()
                .unwrap();
            assert!(cp.parent_revision_id.is_none());
            assert_eq!(cp.state.messages.len(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_turns_serialize_per_thread() {
        let transport = RecordingTransport::new();
        let agent = slow_agent("ok");
        let config = BotConfig {
            concurrency: ConcurrencyPolicy::SerializePerThread,
            ..BotConfig::default()
        };
        let d = dispatcher_with(
            InMemoryCheckpointStore::new(),
            &agent,
            &transport,
            &ScriptedProvider::new(),
            config,
        );

        let (a, b) = tokio::join!(d.dispatch(request("first")), d.dispatch(request("second")));
        let (a, b) = (a.unwrap(), b.unwrap());

        let latest = d.store().get_latest(&thread()).await.unwrap().unwrap();
        assert_eq!(latest.revision_id, b.revision_id);
        assert_eq!(latest.parent_revision_id, Some(a.revision_id));
        assert_eq!(
            latest.state.messages,
            vec![
                Message::user("first"),
                Message::assistant("ok"),
                Message::user("second"),
                Message::assistant("ok"),
            ]
        );
        assert!(d.locks.is_empty());
    }

    #[tokio::test]
    async fn test_thread_locks_are_released_after_turns() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::replying("ok");
        let config = BotConfig {
            concurrency: ConcurrencyPolicy::SerializePerThread,
            ..BotConfig::default()
        };
        let d = dispatcher_with(
            InMemoryCheckpointStore::new(),
            &agent,
            &transport,
            &ScriptedProvider::new(),
            config,
        );

        for i in 0..5 {
            let mut req = request("hi");
            req.address.thread_ts = Some(format!("1700000000.00030{i}"));
            d.dispatch(req).await.unwrap();
        }
        assert!(agent.requests().iter().all(|r| r.messages.len() == 1));

        assert_eq!(d.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_history_is_compacted_on_load() {
        let transport = RecordingTransport::new();
        let agent = ScriptedAgent::replying("ok");
        let provider = ScriptedProvider::replying("SUMMARY-7f3a: user set up the repo");
        let mut config = BotConfig {
            default_model: "tiny-model".to_string(),
            recent_buffer: 2,
            context_reserve_tokens: 0,
            min_context_tokens: 1,
            ..BotConfig::default()
        };
        config.context_windows.insert("tiny-model".to_string(), 50);

        let store = InMemoryCheckpointStore::new();
        let mut history = vec![Message::system("You are helpful.")];
        for i in 0..5 {
            history.push(Message::user(format!("{i}: {}", "x".repeat(100))));
        }
        store
            .put(Checkpoint::next(
                thread(),
                None,
                ConversationState::new(history.clone()),
                serde_json::json!({"step": 1}),
            ))
            .await
            .unwrap();

        let d = dispatcher_with(store, &agent, &transport, &provider, config);
        d.dispatch(request("next")).await.unwrap();

        let sent = &agent.requests()[0].messages;
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0], history[0]);
        assert!(sent[1].is_system());
        assert!(sent[1].content.contains("SUMMARY-7f3a"));
        assert_eq!(sent[2], history[4]);
        assert_eq!(sent[3], history[5]);
        assert_eq!(sent[4], Message::user("next"));

        // Compaction works on the loaded copy; the stored revision is untouched.
        let revisions = d.store().list_revisions(&thread(), 10).await.unwrap();
        assert_eq!(revisions.len(), 2);
        let original = d
            .store()
            .get(&thread(), &revisions[1].revision_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.state.messages, history);
    }
}
