//! Export pipeline
//!
//! A bounded drop-oldest queue in front of an `ExportTransport`. Producers
//! call `enqueue`, which never blocks or awaits. A background worker removes
//! items in batches when a full batch is waiting or the schedule delay
//! elapses, and hands each batch to the transport under a per-call timeout.
//! Transport failures are counted and logged, never returned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OnceCell, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracehook_core::config::ExportSettings;
use tracehook_core::{ExportPayload, ExportQueueItem, ExportTransport};
use tracehook_observability::Metrics;

/// Bounded FIFO that evicts the oldest item on overflow
#[derive(Debug)]
pub struct ExportQueue {
    items: Mutex<VecDeque<ExportQueueItem>>,
    capacity: usize,
}

impl ExportQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append an item, returning the evicted one when the queue was full
    pub fn push(&self, item: ExportQueueItem) -> Option<ExportQueueItem> {
        let mut items = self.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    /// Remove up to `max` items from the front
    pub fn pop_batch(&self, max: usize) -> Vec<ExportQueueItem> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Remove everything
    pub fn drain_all(&self) -> Vec<ExportQueueItem> {
        self.lock().drain(..).collect()
    }

    /// Payloads currently queued, oldest first
    pub fn snapshot(&self) -> Vec<ExportPayload> {
        self.lock().iter().map(|item| item.payload.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ExportQueueItem>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counters since the pipeline started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub enqueued: u64,
    pub evicted: u64,
    /// Items delivered by successful transport calls
    pub exported: u64,
    pub failed_batches: u64,
    /// Items lost with failed batches
    pub dropped: u64,
    /// Items thrown away at shutdown or enqueued after it
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    enqueued: AtomicU64,
    evicted: AtomicU64,
    exported: AtomicU64,
    failed_batches: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            exported: self.exported.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of the shutdown drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items delivered during the drain
    pub exported: u64,
    /// Items discarded because the drain ran out of time
    pub discarded: u64,
    pub timed_out: bool,
    pub elapsed: Duration,
}

struct Shared {
    queue: ExportQueue,
    transport: Arc<dyn ExportTransport>,
    settings: ExportSettings,
    metrics: Option<Metrics>,
    stats: StatCounters,
    batch_ready: Notify,
    in_flight: AtomicUsize,
}

impl Shared {
    /// Send one batch from the front of the queue. Returns the number of
    /// items exported.
    async fn export_next_batch(&self) -> u64 {
        let items = self.queue.pop_batch(self.settings.max_batch_size);
        if items.is_empty() {
            return 0;
        }
        let count = items.len();
        let batch: Vec<ExportPayload> = items.into_iter().map(|item| item.payload).collect();

        self.in_flight.store(count, Ordering::SeqCst);
        let result =
            tokio::time::timeout(self.settings.export_timeout(), self.transport.export(batch))
                .await;
        self.in_flight.store(0, Ordering::SeqCst);

        match result {
            Ok(Ok(())) => {
                self.stats.exported.fetch_add(count as u64, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_export_batch();
                }
                count as u64
            }
            Ok(Err(e)) => {
                self.batch_failed(count, &e.to_string());
                0
            }
            Err(_) => {
                self.batch_failed(count, "export timed out");
                0
            }
        }
    }

    fn batch_failed(&self, count: usize, reason: &str) {
        self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.stats.dropped.fetch_add(count as u64, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_export_failure();
        }
        tracing::warn!(
            transport = self.transport.name(),
            items = count,
            error = %reason,
            "Dropping telemetry batch"
        );
    }

    fn discard(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.stats.discarded.fetch_add(count, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_export_discarded(count);
        }
    }
}

/// Bounded, non-blocking export pipeline with a background flush worker
pub struct ExportPipeline {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    drained: OnceCell<DrainReport>,
}

impl ExportPipeline {
    /// Start the flush worker on the current tokio runtime
    pub fn start(
        transport: Arc<dyn ExportTransport>,
        settings: ExportSettings,
        metrics: Option<Metrics>,
    ) -> Self {
        let settings = settings.normalized();
        let shared = Arc::new(Shared {
            queue: ExportQueue::new(settings.queue_capacity),
            transport,
            settings,
            metrics,
            stats: StatCounters::default(),
            batch_ready: Notify::new(),
            in_flight: AtomicUsize::new(0),
        });
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker_shared = Arc::clone(&shared);
        let worker = tokio::spawn(async move {
            Self::worker_loop(worker_shared, stop_rx).await;
        });

        Self {
            shared,
            stop_tx,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            drained: OnceCell::new(),
        }
    }

    /// Queue a finished record or metric delta. Never blocks.
    ///
    /// Returns false when the item was not admitted because the pipeline is
    /// shut down. Eviction of an older item still admits the new one.
    pub fn enqueue(&self, payload: impl Into<ExportPayload>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            self.shared.discard(1);
            tracing::debug!("Export pipeline closed, discarding item");
            return false;
        }

        let shared = &self.shared;
        shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        if shared.queue.push(ExportQueueItem::new(payload)).is_some() {
            shared.stats.evicted.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &shared.metrics {
                metrics.record_export_evicted(1);
            }
            tracing::debug!(
                capacity = shared.queue.capacity(),
                "Export queue full, evicted oldest item"
            );
        }

        if shared.queue.len() >= shared.settings.max_batch_size {
            shared.batch_ready.notify_one();
        }
        true
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.snapshot()
    }

    pub fn queue(&self) -> &ExportQueue {
        &self.shared.queue
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.shared.settings
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the worker, drain what is left and flush the transport.
    ///
    /// Whatever has not been delivered when `timeout` elapses is discarded.
    /// Repeated calls return the first report without draining again.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        *self
            .drained
            .get_or_init(|| self.drain_and_close(timeout))
            .await
    }

    async fn drain_and_close(&self, timeout: Duration) -> DrainReport {
        self.closed.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let _ = self.stop_tx.send(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let abort = worker.as_ref().map(|handle| handle.abort_handle());

        let shared = Arc::clone(&self.shared);
        let drain = async move {
            if let Some(handle) = worker {
                let _ = handle.await;
            }
            let mut exported = 0;
            while !shared.queue.is_empty() {
                exported += shared.export_next_batch().await;
            }
            if let Err(e) = shared.transport.flush().await {
                tracing::warn!(
                    transport = shared.transport.name(),
                    error = %e,
                    "Transport flush failed"
                );
            }
            exported
        };

        let mut report = match tokio::time::timeout(timeout, drain).await {
            Ok(exported) => DrainReport {
                exported,
                ..Default::default()
            },
            Err(_) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                let lost = self.shared.queue.drain_all().len()
                    + self.shared.in_flight.swap(0, Ordering::SeqCst);
                self.shared.discard(lost as u64);
                tracing::warn!(
                    discarded = lost,
                    timeout_ms = timeout.as_millis() as u64,
                    "Export drain timed out"
                );
                DrainReport {
                    discarded: lost as u64,
                    timed_out: true,
                    ..Default::default()
                }
            }
        };
        report.elapsed = started.elapsed();

        tracing::debug!(
            exported = report.exported,
            discarded = report.discarded,
            "Export pipeline shut down"
        );
        report
    }

    /// Background worker loop
    async fn worker_loop(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(shared.settings.schedule_delay());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shared.batch_ready.notified() => {
                    // Export full batches as long as they keep arriving
                    while shared.queue.len() >= shared.settings.max_batch_size {
                        shared.export_next_batch().await;
                    }
                }
                _ = interval.tick() => {
                    // Periodic flush for low-traffic periods
                    let pending = shared.queue.len().div_ceil(shared.settings.max_batch_size);
                    for _ in 0..pending {
                        shared.export_next_batch().await;
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }

        tracing::debug!("Export worker loop exited");
    }
}

impl Drop for ExportPipeline {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) && !self.shared.queue.is_empty() {
            tracing::warn!(
                pending = self.shared.queue.len(),
                "ExportPipeline dropped without calling shutdown(). Pending items are lost."
            );
        }
    }
}
