//! Streaming output for one turn.
//!
//! - `StreamBuffer`: pending text with reasoning-marker suppression
//! - `StreamingEmitter`: throttled flushes and status indicator over a transport

pub mod buffer;
pub mod emitter;

pub use buffer::StreamBuffer;
pub use emitter::{EmitterSettings, EmitterState, StreamingEmitter};
