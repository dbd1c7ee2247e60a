//! Reasoning-marker detection.
//!
//! Models are prompted to prefix internal reasoning lines with a marker
//! (`thought:` by default). The marker is a prompt-contract detail, so all
//! matching lives here and is ASCII case-insensitive.

use std::borrow::Cow;

use regex::Regex;

/// Longest reasoning excerpt shown in a status preview.
const PREVIEW_CHARS: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("reasoning marker must not be empty")]
    Empty,

    #[error("invalid reasoning marker pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A reasoning marker and its line-anchored strip pattern.
#[derive(Debug, Clone)]
pub struct ReasoningMarker {
    marker: String,
    line_pattern: Regex,
}

impl ReasoningMarker {
    pub fn new(marker: &str) -> Result<Self, MarkerError> {
        let marker = marker.trim().to_ascii_lowercase();
        if marker.is_empty() {
            return Err(MarkerError::Empty);
        }
        let line_pattern = Regex::new(&format!(r"(?im)^(?:\s*{}\s*)+", regex::escape(&marker)))?;
        Ok(Self {
            marker,
            line_pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.marker
    }

    /// Whether `buffer`, ignoring leading whitespace, begins with the marker.
    pub fn is_reasoning_prefix(&self, buffer: &str) -> bool {
        buffer
            .trim_start()
            .get(..self.marker.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&self.marker))
    }

    /// Whether more input could still turn `buffer` into a reasoning prefix.
    ///
    /// True for whitespace-only input and for any proper prefix of the marker.
    pub fn could_become_marker(&self, buffer: &str) -> bool {
        let head = buffer.trim_start().as_bytes();
        head.len() < self.marker.len()
            && self.marker.as_bytes()[..head.len()].eq_ignore_ascii_case(head)
    }

    /// Text following the marker, if `buffer` is a reasoning prefix.
    pub fn strip_prefix<'a>(&self, buffer: &'a str) -> Option<&'a str> {
        if !self.is_reasoning_prefix(buffer) {
            return None;
        }
        buffer.trim_start().get(self.marker.len()..)
    }

    /// Length of the longest non-empty proper marker prefix that `buffer`
    /// ends with.
    pub fn trailing_partial_len(&self, buffer: &str) -> Option<usize> {
        let tail = buffer.as_bytes();
        let marker = self.marker.as_bytes();
        (1..marker.len()).rev().find(|&len| {
            tail.len() >= len && tail[tail.len() - len..].eq_ignore_ascii_case(&marker[..len])
        })
    }

    /// Remove marker occurrences (repeated, case-insensitive) anchored at
    /// the start of any line.
    pub fn strip_line_markers<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.line_pattern.replace_all(text, "")
    }

    /// Whether `line` is nothing but an incomplete marker.
    pub fn is_partial_line(&self, line: &str) -> bool {
        let line = line.trim();
        !line.is_empty() && self.could_become_marker(line)
    }
}

/// Status text previewing a reasoning excerpt.
pub fn reasoning_preview(reasoning: &str) -> String {
    let excerpt: String = reasoning.trim().chars().take(PREVIEW_CHARS).collect();
    format!("Reasoning: {excerpt}...")
}
