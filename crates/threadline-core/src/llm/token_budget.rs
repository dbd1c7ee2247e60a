//! Token budget for the conversation history sent to the model.
//!
//! The budget is derived from the active model's context window minus a
//! fixed reserve for the expected output and system overhead.

use threadline_types::config::BotConfig;

/// Limits enforced by the context compactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Upper bound on the estimated token count of the history.
    pub max_tokens: u32,
    /// Most recent non-system messages that are never summarized away.
    pub recent_buffer: usize,
}

impl Budget {
    pub fn new(max_tokens: u32, recent_buffer: usize) -> Self {
        Self {
            max_tokens,
            recent_buffer,
        }
    }

    /// `max(window - reserve, floor)`: the reserve never shrinks the
    /// budget below a usable minimum.
    pub fn for_context_window(window: u32, reserve: u32, floor: u32) -> u32 {
        window.saturating_sub(reserve).max(floor)
    }

    /// Budget for a context window using the configured reserve and floor.
    pub fn from_config(window: u32, config: &BotConfig) -> Self {
        Self::new(
            Self::for_context_window(
                window,
                config.context_reserve_tokens,
                config.min_context_tokens,
            ),
            config.recent_buffer,
        )
    }

    /// Whether an estimated token count requires compaction.
    pub fn is_exceeded_by(&self, tokens: u32) -> bool {
        tokens >= self.max_tokens
    }
}
