//! Model registry for context window lookup.
//!
//! Resolves how many tokens a model accepts: explicit overrides first,
//! then known model families, then the configured default.

use std::collections::HashMap;

use threadline_types::config::BotConfig;

use super::token_budget::Budget;

/// Known model families and their context windows, matched by substring.
const KNOWN_FAMILIES: &[(&str, u32)] = &[
    ("kimi", 128_000),
    ("gpt-4", 128_000),
    ("claude-3", 200_000),
];

/// Name-indexed context window table.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    windows: HashMap<String, u32>,
    default_window: u32,
}

impl ModelRegistry {
    /// Create a registry with no overrides.
    pub fn new(default_window: u32) -> Self {
        Self {
            windows: HashMap::new(),
            default_window,
        }
    }

    /// Registry seeded from `context_windows` and `default_context_window`.
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            windows: config.context_windows.clone(),
            default_window: config.default_context_window,
        }
    }

    /// Register a context window for an exact model name.
    ///
    /// If the model is already registered, its window is replaced.
    pub fn register(&mut self, model: impl Into<String>, window: u32) {
        self.windows.insert(model.into(), window);
    }

    pub fn context_window(&self, model: &str) -> u32 {
        if let Some(window) = self.windows.get(model) {
            return *window;
        }

        let lowered = model.to_lowercase();
        if let Some((_, window)) = KNOWN_FAMILIES
            .iter()
            .find(|(family, _)| lowered.contains(family))
        {
            return *window;
        }

        tracing::warn!(
            model,
            default = self.default_window,
            "unknown context window, using default"
        );
        self.default_window
    }

    /// Compaction budget for a model under the given configuration.
    pub fn budget_for(&self, model: &str, config: &BotConfig) -> Budget {
        Budget::from_config(self.context_window(model), config)
    }
}
