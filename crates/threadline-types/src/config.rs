//! Bot configuration types.
//!
//! `BotConfig` represents the top-level `config.toml` that controls the
//! model selection, streaming cadence, context budget and turn policy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::conversation::Persona;

/// Top-level configuration for the bot.
///
/// Loaded from `~/.threadline/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Model used for the agent and for summarization.
    pub default_model: String,

    /// Minimum interval between stream flushes to the transport.
    pub streaming_throttle_ms: u64,

    /// Minimum interval between minor status text updates.
    pub status_throttle_ms: u64,

    /// Line prefix the model uses for internal reasoning.
    pub reasoning_marker: String,

    /// Most recent non-system messages never summarized away.
    pub recent_buffer: usize,

    /// Tokens held back from the context window for output and overhead.
    pub context_reserve_tokens: u32,

    /// Lower bound on the usable context budget.
    pub min_context_tokens: u32,

    /// Context window assumed for models with no known size.
    pub default_context_window: u32,

    /// Per-model context window overrides, keyed by model name.
    pub context_windows: HashMap<String, u32>,

    /// Maximum agent steps per turn.
    pub step_limit: u32,

    /// Prefix of derived thread ids.
    pub thread_id_prefix: String,

    pub concurrency: ConcurrencyPolicy,

    pub retry: RetryConfig,

    pub personas: PersonaSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            default_model: "moonshotai/kimi-k2.5".to_string(),
            streaming_throttle_ms: 800,
            status_throttle_ms: 500,
            reasoning_marker: "thought:".to_string(),
            recent_buffer: 10,
            context_reserve_tokens: 5_000,
            min_context_tokens: 4_000,
            default_context_window: 128_000,
            context_windows: HashMap::new(),
            step_limit: 100,
            thread_id_prefix: "chat".to_string(),
            concurrency: ConcurrencyPolicy::default(),
            retry: RetryConfig::default(),
            personas: PersonaSettings::default(),
        }
    }
}

impl BotConfig {
    /// Model for a persona, honoring its profile override.
    pub fn model_for(&self, persona: Persona) -> &str {
        self.personas
            .profile(persona)
            .model
            .as_deref()
            .unwrap_or(&self.default_model)
    }

    /// Step limit for a persona, honoring its profile override.
    pub fn step_limit_for(&self, persona: Persona) -> u32 {
        self.personas
            .profile(persona)
            .step_limit
            .unwrap_or(self.step_limit)
    }
}

/// How concurrent turns on the same thread are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Turns run unsynchronized; the last checkpoint write wins.
    #[default]
    LastWriteWins,
    /// Turns on one thread hold a per-thread lock across load-execute-save.
    SerializePerThread,
}

/// Backoff settings for rate-limited transport calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
        }
    }
}

/// Per-persona overrides. Unknown persona tables are rejected at load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersonaSettings {
    pub general: PersonaProfile,
    pub automation: PersonaProfile,
    pub reviewer: PersonaProfile,
}

impl PersonaSettings {
    pub fn profile(&self, persona: Persona) -> &PersonaProfile {
        match persona {
            Persona::General => &self.general,
            Persona::Automation => &self.automation,
            Persona::Reviewer => &self.reviewer,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaProfile {
    pub model: Option<String>,
    pub step_limit: Option<u32>,
}
