//! LlmProvider trait definition.
//!
//! The summarization model sits behind this abstraction. Uses RPITIT for
//! `complete` and `count_tokens`; see `BoxLlmProvider` for dynamic dispatch.

use std::future::Future;

use threadline_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, TokenCount,
};

/// Trait for LLM provider backends.
///
/// Implementations live outside this crate; core code only depends on the
/// trait (or the type-erased `BoxLlmProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Context limits and tokenizer support.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Send a single-shot completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, LlmError>> + Send;

    /// Count the tokens in a request without sending it to the LLM.
    ///
    /// Providers without a native tokenizer return
    /// `LlmError::TokenCountUnsupported`; callers fall back to an estimate.
    fn count_tokens(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<TokenCount, LlmError>> + Send;
}
