//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing setup
//! - OpenTelemetry metrics for channel operations

pub mod metrics;
pub mod tracing;
