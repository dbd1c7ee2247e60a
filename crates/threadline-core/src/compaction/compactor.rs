//! Context compactor.
//!
//! `ContextCompactor` keeps a conversation inside the model's context
//! budget by replacing older history with a model-written summary. The
//! leading system prompt and the most recent messages are kept verbatim.
//! Every failure leaves the history unreduced.

use std::future::Future;
use std::sync::Arc;

use threadline_types::config::RetryConfig;
use threadline_types::conversation::Destination;
use threadline_types::error::CompactionError;
use threadline_types::llm::CompletionRequest;
use threadline_types::message::{Message, MessageRole};

use crate::checkpoint::MessageReducer;
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::token_budget::Budget;
use crate::retry::retry_on_rate_limit;
use crate::transport::NoticeSink;

use super::estimator::estimate_history;

/// Tag opening every summary message.
pub const SUMMARY_TAG: &str = "[PREVIOUS CONVERSATION SUMMARY]";

const SUMMARY_PREAMBLE: &str = "The following is a condensed summary of the earlier conversation. \
Use this context to understand past decisions:";

/// Notice posted to the conversation when history was summarized.
pub const COMPACTION_NOTICE: &str = "*Auto compact triggered*\nThis conversation got long, so \
earlier history was summarized. File paths and key context are preserved.";

/// System prompt for the context summarization LLM call.
const SUMMARY_SYSTEM_PROMPT: &str = r#"Summarize the following technical conversation concisely.
Key requirements:
1. Preserve file paths and directories: explicitly list every directory visited and every file modified.
2. Preserve function names, identifiers and specific technical decisions.
3. Note which tasks are finished and which are still pending.
4. Ignore casual chitchat."#;

const SUMMARY_MAX_TOKENS: u32 = 2_048;

/// Whether a message is a summary produced by a previous compaction.
pub fn is_summary(message: &Message) -> bool {
    message.is_system() && message.content.trim_start().starts_with(SUMMARY_TAG)
}

fn summary_message(summary: &str) -> Message {
    Message::system(format!("{SUMMARY_TAG}\n{SUMMARY_PREAMBLE}\n\n{summary}"))
}

/// Best-effort notice to the conversation a compaction ran for.
#[derive(Clone)]
pub struct CompactionNotice {
    sink: Arc<dyn NoticeSink>,
    destination: Destination,
    retry: RetryConfig,
}

impl CompactionNotice {
    pub fn new(sink: Arc<dyn NoticeSink>, destination: Destination, retry: RetryConfig) -> Self {
        Self {
            sink,
            destination,
            retry,
        }
    }

    /// Spawn the notice on the current runtime, if there is one.
    ///
    /// Never awaited by the caller and never fails.
    pub fn schedule(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(destination = %self.destination, "no runtime, compaction notice skipped");
            return;
        };

        let sink = Arc::clone(&self.sink);
        let destination = self.destination.clone();
        let retry = self.retry.clone();
        handle.spawn(async move {
            let sent = retry_on_rate_limit(&retry, "compaction_notice", || {
                sink.send_notice(&destination, COMPACTION_NOTICE)
            })
            .await;
            if let Err(e) = sent {
                tracing::warn!(%destination, error = %e, "compaction notice not delivered");
            }
        });
    }
}

/// Summarizes overflow history under a token budget.
#[derive(Debug)]
pub struct ContextCompactor {
    provider: BoxLlmProvider,
    model: String,
}

impl ContextCompactor {
    pub fn new(provider: BoxLlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token count of a history: the provider's tokenizer when it has one,
    /// otherwise the character estimate.
    pub async fn measure(&self, messages: &[Message]) -> u32 {
        if self.provider.capabilities().native_token_count {
            let request = CompletionRequest {
                model: self.model.clone(),
                messages: messages.to_vec(),
                system: None,
                max_tokens: 1,
                temperature: None,
            };
            match self.provider.count_tokens(&request).await {
                Ok(count) => return count.input_tokens,
                Err(e) => {
                    tracing::debug!(error = %e, "native token count failed, estimating");
                }
            }
        }
        estimate_history(messages)
    }

    /// Reduce `messages` to fit `budget`, returning them unchanged when
    /// they already fit, when nothing can be summarized, or on any failure.
    pub async fn reduce(
        &self,
        messages: Vec<Message>,
        budget: &Budget,
        notice: Option<&CompactionNotice>,
    ) -> Vec<Message> {
        match self.try_reduce(&messages, budget, notice).await {
            Ok(Some(reduced)) => reduced,
            Ok(None) => messages,
            Err(e) => {
                tracing::error!(error = %e, "compaction failed, keeping full history");
                messages
            }
        }
    }

    /// Like [`reduce`](Self::reduce) but reports failures. `Ok(None)` means
    /// the history is left as is.
    pub async fn try_reduce(
        &self,
        messages: &[Message],
        budget: &Budget,
        notice: Option<&CompactionNotice>,
    ) -> Result<Option<Vec<Message>>, CompactionError> {
        let tokens_before = self.measure(messages).await;
        if !budget.is_exceeded_by(tokens_before) {
            return Ok(None);
        }

        // Leading system messages, earlier summaries included, stay verbatim.
        let prompt_len = messages.iter().take_while(|m| m.is_system()).count();
        let Some(split) = split_point(messages, prompt_len, budget.recent_buffer) else {
            tracing::debug!(
                tokens = tokens_before,
                recent_buffer = budget.recent_buffer,
                "over budget but nothing old enough to summarize"
            );
            return Ok(None);
        };

        tracing::info!(
            tokens = tokens_before,
            max_tokens = budget.max_tokens,
            "compaction triggered"
        );

        let summary = self.summarize(&messages[prompt_len..split]).await?;

        let mut reduced = Vec::with_capacity(prompt_len + 1 + messages.len() - split);
        reduced.extend_from_slice(&messages[..prompt_len]);
        reduced.push(summary_message(&summary));
        reduced.extend_from_slice(&messages[split..]);

        let tokens_after = self.measure(&reduced).await;
        tracing::info!(
            tokens_before,
            tokens_after,
            tokens_saved = tokens_before.saturating_sub(tokens_after),
            summarized_messages = split - prompt_len,
            "context compacted"
        );

        if let Some(notice) = notice {
            notice.schedule();
        }
        Ok(Some(reduced))
    }

    /// Summarize a slice of conversation into plain text.
    #[tracing::instrument(
        name = "summarize_context",
        skip(self, messages),
        fields(
            model = %self.model,
            message_count = messages.len(),
        )
    )]
    async fn summarize(&self, messages: &[Message]) -> Result<String, CompactionError> {
        let transcript = format_transcript(messages);
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::user(format!(
                "Please summarize this conversation:\n\n<conversation>\n{transcript}\n</conversation>"
            ))],
            system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: Some(0.0),
        };

        let response = self.provider.complete(&request).await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(CompactionError::EmptySummary);
        }
        Ok(summary.to_string())
    }
}

/// Index where the verbatim tail starts, or `None` if the messages after
/// `prompt_len` are all recent.
///
/// The tail holds at least `recent_buffer` non-system messages and never
/// starts with a tool result, so tool calls stay paired with their results.
fn split_point(messages: &[Message], prompt_len: usize, recent_buffer: usize) -> Option<usize> {
    if messages.len() - prompt_len <= recent_buffer {
        return None;
    }

    let mut split = messages.len();
    let mut recent = 0;
    while split > prompt_len && recent < recent_buffer {
        split -= 1;
        if !messages[split].is_system() {
            recent += 1;
        }
    }
    if recent < recent_buffer {
        return None;
    }

    while split > prompt_len
        && split < messages.len()
        && messages[split].role == MessageRole::Tool
    {
        split -= 1;
    }

    (split > prompt_len).then_some(split)
}

/// Render messages as `ROLE: content` lines for the summarizer.
fn format_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        let role = message.role.to_string().to_uppercase();
        match &message.tool_call_id {
            Some(call_id) => lines.push(format!("{role} ({call_id}): {}", message.content)),
            None => lines.push(format!("{role}: {}", message.content)),
        }
        for call in message.tool_calls.iter().flatten() {
            lines.push(format!("  -> {} {} [{}]", call.name, call.arguments, call.id));
        }
    }
    lines.join("\n")
}

/// [`MessageReducer`] that compacts loaded history under a fixed budget.
pub struct CompactingReducer<'a> {
    compactor: &'a ContextCompactor,
    budget: Budget,
    notice: Option<CompactionNotice>,
}

impl<'a> CompactingReducer<'a> {
    pub fn new(compactor: &'a ContextCompactor, budget: Budget) -> Self {
        Self {
            compactor,
            budget,
            notice: None,
        }
    }

    pub fn with_notice(mut self, notice: CompactionNotice) -> Self {
        self.notice = Some(notice);
        self
    }
}

impl MessageReducer for CompactingReducer<'_> {
    fn reduce(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<Vec<Message>, CompactionError>> + Send {
        async move {
            let reduced = self
                .compactor
                .try_reduce(messages, &self.budget, self.notice.as_ref())
                .await?;
            Ok(reduced.unwrap_or_else(|| messages.to_vec()))
        }
    }
}
