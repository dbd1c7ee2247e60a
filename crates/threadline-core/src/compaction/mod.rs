//! Context budget enforcement.
//!
//! - `ContextCompactor`: summarizes overflow history with the LLM
//! - `CompactingReducer`: applies the compactor when a checkpoint is loaded
//! - `estimator`: character-based fallback token count

pub mod compactor;
pub mod estimator;

pub use compactor::{CompactingReducer, CompactionNotice, ContextCompactor};
