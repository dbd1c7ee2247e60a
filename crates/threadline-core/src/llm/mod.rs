//! LLM provider abstractions for Threadline.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: Object-safe wrapper for dynamic dispatch
//! - `ModelRegistry`: context window lookup per model
//! - `Budget`: history token budget derived from a context window

pub mod box_provider;
pub mod provider;
pub mod registry;
pub mod token_budget;
