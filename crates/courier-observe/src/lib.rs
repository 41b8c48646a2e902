//! Observability setup for Courier: structured logging through `tracing`
//! with optional OpenTelemetry span export.

pub mod tracing_setup;
