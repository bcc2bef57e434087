//! Observability setup for durably: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
