//! Per-turn output buffer.
//!
//! `StreamBuffer` decides what part of the agent's token stream is user
//! output. Before the answer starts, a leading reasoning line (one that
//! begins with the reasoning marker) is diverted to the status channel and
//! ambiguous text that could still become the marker is held back. Once the
//! answer has started every token is buffered for flushing.

use crate::reasoning::ReasoningMarker;

/// Side effects requested by [`StreamBuffer::push`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PushEffects {
    /// The answer just started; the status indicator should be cleared.
    pub clear_status: bool,
    /// Reasoning text seen so far on the current reasoning line.
    pub reasoning: Option<String>,
}

#[derive(Debug, Default)]
pub struct StreamBuffer {
    pending: String,
    response_started: bool,
    in_reasoning: bool,
    reasoning_line: String,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn response_started(&self) -> bool {
        self.response_started
    }

    /// Feed one token.
    pub fn push(&mut self, token: &str, marker: &ReasoningMarker) -> PushEffects {
        let mut effects = PushEffects::default();
        if token.is_empty() {
            return effects;
        }
        if self.response_started {
            self.pending.push_str(token);
            return effects;
        }

        let mut rest = token.to_string();
        loop {
            if self.in_reasoning {
                match rest.find('\n') {
                    Some(newline) => {
                        self.reasoning_line.push_str(&rest[..newline]);
                        effects.reasoning = Some(std::mem::take(&mut self.reasoning_line));
                        self.in_reasoning = false;
                        rest = rest[newline + 1..].to_string();
                        continue;
                    }
                    None => {
                        self.reasoning_line.push_str(&rest);
                        effects.reasoning = Some(self.reasoning_line.clone());
                        return effects;
                    }
                }
            }

            let candidate = format!("{}{}", self.pending, rest);
            if let Some(after) = marker.strip_prefix(&candidate) {
                self.pending.clear();
                self.reasoning_line.clear();
                self.in_reasoning = true;
                rest = after.trim_start_matches([' ', '\t']).to_string();
                continue;
            }
            self.pending = candidate;
            if !marker.could_become_marker(&self.pending) {
                self.response_started = true;
                effects.clear_status = true;
            }
            return effects;
        }
    }

    /// Text ready to send, if any.
    ///
    /// Nothing is flushable before the answer starts, while the buffer ends
    /// in a partial marker, or when it holds only marker text.
    pub fn prepare_flush(&self, marker: &ReasoningMarker) -> Option<String> {
        if !self.response_started || self.pending.is_empty() {
            return None;
        }
        if let Some(len) = marker.trailing_partial_len(&self.pending) {
            tracing::trace!(partial_len = len, "flush withheld on partial marker");
            return None;
        }
        let cleaned = marker.strip_line_markers(&self.pending);
        if cleaned.is_empty() {
            return None;
        }
        Some(cleaned.into_owned())
    }

    /// Drop the text returned by the last `prepare_flush` after it was sent.
    pub fn commit_flush(&mut self) {
        self.pending.clear();
    }

    /// Drain the buffer for the final flush.
    ///
    /// Markers are stripped even when the answer never started, a trailing
    /// line holding only a partial marker is dropped, and trailing
    /// whitespace is trimmed. A reply that was a single unterminated
    /// reasoning line is delivered as text rather than lost.
    pub fn finish(&mut self, marker: &ReasoningMarker) -> Option<String> {
        if !self.response_started && self.in_reasoning {
            self.in_reasoning = false;
            let line = std::mem::take(&mut self.reasoning_line);
            let line = marker.strip_line_markers(&line);
            let line = line.trim();
            if !line.is_empty() {
                self.response_started = true;
                return Some(line.to_string());
            }
        }
        let pending = std::mem::take(&mut self.pending);
        let cleaned = marker.strip_line_markers(&pending);
        let kept = match cleaned.rsplit_once('\n') {
            Some((head, last)) if marker.is_partial_line(last) => head,
            None if marker.is_partial_line(&cleaned) => "",
            _ => &*cleaned,
        };
        let kept = kept.trim_end();
        if kept.trim_start().is_empty() {
            return None;
        }
        let text = if self.response_started {
            kept
        } else {
            kept.trim_start()
        };
        Some(text.to_string())
    }
}
