//! Observability setup for Flowdesk: structured logging via `tracing`, with
//! an optional OpenTelemetry bridge.

pub mod tracing_setup;
