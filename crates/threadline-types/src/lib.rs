//! Shared domain types for Threadline.
//!
//! This crate contains the core domain types used across the workspace:
//! messages, checkpoints, conversation addressing, agent events, bot
//! configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod llm;
pub mod message;
