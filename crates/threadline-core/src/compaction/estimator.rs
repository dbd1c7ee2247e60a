//! Fallback token estimation.
//!
//! Used when the provider has no native tokenizer or counting fails:
//! roughly four characters per token, counted per message.

use threadline_types::message::Message;

const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens for a single message's content.
pub fn estimate_message(message: &Message) -> u32 {
    let tokens = message.content.chars().count() / CHARS_PER_TOKEN;
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// Estimate total tokens for a message history.
pub fn estimate_history(messages: &[Message]) -> u32 {
    messages
        .iter()
        .map(estimate_message)
        .fold(0u32, u32::saturating_add)
}
