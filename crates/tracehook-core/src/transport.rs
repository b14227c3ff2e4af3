//! Export transport abstraction
//!
//! The export pipeline hands finished batches to an `ExportTransport`. The
//! transport owns the wire encoding; the pipeline owns batching, timeouts and
//! failure accounting.

use crate::records::{ExportPayload, LogRecord, MetricDelta, SpanRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Batch rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for finished telemetry batches
#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Deliver one batch. The pipeline applies its own timeout around this call.
    async fn export(&self, batch: Vec<ExportPayload>) -> Result<(), TransportError>;

    /// Push out anything the transport buffers internally
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Transport name for diagnostics
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct MemoryInner {
    items: Mutex<Vec<ExportPayload>>,
    batches: AtomicUsize,
    flushes: AtomicUsize,
    failing: AtomicBool,
}

/// In-process transport that keeps every exported payload.
///
/// Clones share the same storage, so a handle can be kept for inspection
/// after the transport is moved into a pipeline.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent exports fail with `Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything exported so far, in delivery order
    pub fn items(&self) -> Vec<ExportPayload> {
        self.lock().clone()
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.lock().iter().filter_map(|p| p.as_span().cloned()).collect()
    }

    pub fn metrics(&self) -> Vec<MetricDelta> {
        self.lock().iter().filter_map(|p| p.as_metric().cloned()).collect()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.lock().iter().filter_map(|p| p.as_log().cloned()).collect()
    }

    /// Number of successful export calls
    pub fn batch_count(&self) -> usize {
        self.inner.batches.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ExportPayload>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExportTransport for MemoryTransport {
    async fn export(&self, batch: Vec<ExportPayload>) -> Result<(), TransportError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("memory transport set to fail".to_string()));
        }
        self.lock().extend(batch);
        self.inner.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.inner.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
