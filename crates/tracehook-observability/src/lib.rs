//! Tracehook Observability
//!
//! This crate provides the telemetry backends of the session engine:
//! - Metrics recording (Prometheus)
//! - OpenTelemetry provider setup and the OTLP export transport
//! - Diagnostic logging

pub mod logging;
pub mod metrics;
pub mod otlp;
pub mod tracing;

pub use metrics::Metrics;
pub use otlp::OtlpTransport;
pub use tracing::{ProviderError, TelemetryProviders};
