//! Observability setup for Threadline: structured logging through
//! `tracing-subscriber` and optional OpenTelemetry span export.

pub mod tracing_setup;
