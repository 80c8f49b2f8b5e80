//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via `tracing-subscriber`
//! - OpenTelemetry metrics for the write pipeline, with optional OTLP export

pub mod metrics;
pub mod tracing;
