//! Tracehook Core Types and Traits
//!
//! This crate provides the fundamental types shared by the telemetry engine:
//! - Hook events and payload parsing
//! - Span, metric and log records handed to the export pipeline
//! - Token usage counters
//! - Telemetry configuration
//! - The export transport abstraction
//! - Core error types

pub mod config;
pub mod error;
pub mod events;
pub mod records;
pub mod transport;
pub mod usage;

pub use config::TelemetryConfig;
pub use error::{Error, Result};
pub use events::HookEvent;
pub use records::{
    AttributeSet, AttributeValue, ExportPayload, ExportQueueItem, LogRecord, LogSeverity,
    MetricDelta, SpanEvent, SpanId, SpanKind, SpanRecord, SpanStatus, TraceId,
};
pub use transport::{ExportTransport, MemoryTransport, TransportError};
pub use usage::{TokenCounts, UsageSource};
