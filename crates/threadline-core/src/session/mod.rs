//! Turn orchestration.
//!
//! - `SessionDispatcher`: load, run the agent, stream, save
//! - `ThreadLocks`: optional per-thread serialization of turns

pub mod dispatcher;
pub mod thread_locks;

pub use dispatcher::{SessionDispatcher, TurnOutcome};
pub use thread_locks::ThreadLocks;
