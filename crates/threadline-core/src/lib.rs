//! Conversation checkpointing, context compaction and streaming dispatch.
//!
//! This crate defines the "ports" (store, transport, agent and LLM traits)
//! that the infrastructure layer implements, plus the turn logic built on
//! them. It depends only on `threadline-types` -- never on
//! `threadline-infra` or any database/IO crate.

pub mod agent;
pub mod checkpoint;
pub mod compaction;
pub mod llm;
pub mod reasoning;
pub mod retry;
pub mod session;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_support;
