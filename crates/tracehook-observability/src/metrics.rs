//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for agent sessions:
//! - Tool call counts, errors and durations by tool name
//! - Turn, model request and token counts by model
//! - Prompt cache hits, misses and creations
//! - Context compactions
//! - Export pipeline health (evictions, failures, discards)
//!
//! All recorders are safe to call concurrently from overlapping tool calls.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracehook_core::MetricDelta;
use tracehook_core::TokenCounts;

/// Metrics collector for agent sessions
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    // Tool metrics
    /// Tool calls completed
    pub tool_calls_total: CounterVec,
    /// Tool calls that reported an error
    pub tool_errors_total: CounterVec,
    /// Tool call duration in milliseconds
    pub tool_duration_ms: HistogramVec,

    // Model metrics
    pub turns_total: CounterVec,
    pub model_requests_total: CounterVec,
    /// Tokens by kind (input, output, cache_read, cache_creation)
    pub tokens_total: CounterVec,
    /// Time between a turn completing and the next prompt
    pub prompt_latency_ms: HistogramVec,

    // Prompt cache metrics
    pub cache_hits_total: CounterVec,
    pub cache_misses_total: CounterVec,
    pub cache_creations_total: CounterVec,

    pub compactions_total: CounterVec,

    /// Sessions currently open
    pub sessions_in_flight: Gauge,

    // Export pipeline metrics
    pub export_evicted_total: IntCounter,
    pub export_failures_total: IntCounter,
    pub export_batches_total: IntCounter,
    pub export_discarded_total: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tool_calls_total = CounterVec::new(
            Opts::new("tracehook_tool_calls_total", "Total number of tool calls"),
            &["tool_name"],
        )?;

        let tool_errors_total = CounterVec::new(
            Opts::new(
                "tracehook_tool_errors_total",
                "Total number of tool calls that reported an error",
            ),
            &["tool_name"],
        )?;

        let tool_duration_ms = HistogramVec::new(
            HistogramOpts::new(
                "tracehook_tool_duration_ms",
                "Tool call duration in milliseconds",
            )
            .buckets(vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
                30000.0, 60000.0,
            ]),
            &["tool_name"],
        )?;

        let turns_total = CounterVec::new(
            Opts::new("tracehook_turns_total", "Total number of completed turns"),
            &["model"],
        )?;

        let model_requests_total = CounterVec::new(
            Opts::new(
                "tracehook_model_requests_total",
                "Total number of prompts sent to a model",
            ),
            &["model"],
        )?;

        let tokens_total = CounterVec::new(
            Opts::new("tracehook_tokens_total", "Total tokens by kind"),
            &["model", "kind"],
        )?;

        let prompt_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "tracehook_prompt_latency_ms",
                "Time from a completed turn to the next prompt in milliseconds",
            )
            .buckets(vec![
                100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0, 300000.0,
            ]),
            &["model"],
        )?;

        let cache_hits_total = CounterVec::new(
            Opts::new(
                "tracehook_cache_hits_total",
                "Turns that read from the prompt cache",
            ),
            &["model"],
        )?;

        let cache_misses_total = CounterVec::new(
            Opts::new(
                "tracehook_cache_misses_total",
                "Turns that did not read from the prompt cache",
            ),
            &["model"],
        )?;

        let cache_creations_total = CounterVec::new(
            Opts::new(
                "tracehook_cache_creations_total",
                "Turns that wrote new prompt cache entries",
            ),
            &["model"],
        )?;

        let compactions_total = CounterVec::new(
            Opts::new(
                "tracehook_compactions_total",
                "Context window compactions",
            ),
            &["trigger", "model"],
        )?;

        let sessions_in_flight = Gauge::with_opts(Opts::new(
            "tracehook_sessions_in_flight",
            "Sessions currently open",
        ))?;

        let export_evicted_total = IntCounter::with_opts(Opts::new(
            "tracehook_export_evicted_total",
            "Queued items evicted because the export queue was full",
        ))?;

        let export_failures_total = IntCounter::with_opts(Opts::new(
            "tracehook_export_failures_total",
            "Export batches that failed or timed out",
        ))?;

        let export_batches_total = IntCounter::with_opts(Opts::new(
            "tracehook_export_batches_total",
            "Export batches delivered",
        ))?;

        let export_discarded_total = IntCounter::with_opts(Opts::new(
            "tracehook_export_discarded_total",
            "Queued items discarded at shutdown",
        ))?;

        registry.register(Box::new(tool_calls_total.clone()))?;
        registry.register(Box::new(tool_errors_total.clone()))?;
        registry.register(Box::new(tool_duration_ms.clone()))?;
        registry.register(Box::new(turns_total.clone()))?;
        registry.register(Box::new(model_requests_total.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(prompt_latency_ms.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(cache_creations_total.clone()))?;
        registry.register(Box::new(compactions_total.clone()))?;
        registry.register(Box::new(sessions_in_flight.clone()))?;
        registry.register(Box::new(export_evicted_total.clone()))?;
        registry.register(Box::new(export_failures_total.clone()))?;
        registry.register(Box::new(export_batches_total.clone()))?;
        registry.register(Box::new(export_discarded_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            tool_calls_total,
            tool_errors_total,
            tool_duration_ms,
            turns_total,
            model_requests_total,
            tokens_total,
            prompt_latency_ms,
            cache_hits_total,
            cache_misses_total,
            cache_creations_total,
            compactions_total,
            sessions_in_flight,
            export_evicted_total,
            export_failures_total,
            export_batches_total,
            export_discarded_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Apply one metric update
    pub fn record(&self, delta: &MetricDelta) {
        match delta {
            MetricDelta::ToolCall {
                tool_name,
                duration_ms,
                error,
            } => self.record_tool_call(tool_name.as_str(), *duration_ms, *error),
            MetricDelta::Turn { model } => self.record_turn(model.as_str()),
            MetricDelta::CacheUsage {
                model,
                cache_read,
                cache_creation,
            } => self.record_cache_usage(model.as_str(), *cache_read, *cache_creation),
            MetricDelta::ModelRequest { model } => self.record_model_request(model.as_str()),
            MetricDelta::Compaction { trigger, model } => {
                self.record_compaction(trigger.as_str(), model.as_str())
            }
            MetricDelta::Tokens { model, usage } => self.record_tokens(model.as_str(), usage),
            MetricDelta::PromptLatency { model, latency_ms } => {
                self.record_prompt_latency(model.as_str(), *latency_ms)
            }
        }
    }

    /// Record a finished tool call
    pub fn record_tool_call(&self, tool_name: &str, duration_ms: f64, error: bool) {
        self.tool_calls_total.with_label_values(&[tool_name]).inc();
        if error {
            self.tool_errors_total.with_label_values(&[tool_name]).inc();
        }
        self.tool_duration_ms
            .with_label_values(&[tool_name])
            .observe(duration_ms.max(0.0));
    }

    pub fn record_turn(&self, model: &str) {
        self.turns_total.with_label_values(&[model]).inc();
    }

    pub fn record_model_request(&self, model: &str) {
        self.model_requests_total.with_label_values(&[model]).inc();
    }

    /// Record prompt cache usage for one turn.
    ///
    /// A turn is a hit when it read any cached tokens and a miss otherwise.
    pub fn record_cache_usage(&self, model: &str, cache_read: u64, cache_creation: u64) {
        if cache_read > 0 {
            self.cache_hits_total.with_label_values(&[model]).inc();
        } else {
            self.cache_misses_total.with_label_values(&[model]).inc();
        }
        if cache_creation > 0 {
            self.cache_creations_total.with_label_values(&[model]).inc();
        }
    }

    pub fn record_compaction(&self, trigger: &str, model: &str) {
        self.compactions_total
            .with_label_values(&[trigger, model])
            .inc();
    }

    /// Record token usage
    pub fn record_tokens(&self, model: &str, usage: &TokenCounts) {
        let kinds = [
            ("input", usage.input_tokens),
            ("output", usage.output_tokens),
            ("cache_read", usage.cache_read_input_tokens),
            ("cache_creation", usage.cache_creation_input_tokens),
        ];
        for (kind, count) in kinds {
            if count > 0 {
                self.tokens_total
                    .with_label_values(&[model, kind])
                    .inc_by(count as f64);
            }
        }
    }

    pub fn record_prompt_latency(&self, model: &str, latency_ms: f64) {
        self.prompt_latency_ms
            .with_label_values(&[model])
            .observe(latency_ms.max(0.0));
    }

    pub fn session_opened(&self) {
        self.sessions_in_flight.inc();
    }

    pub fn session_closed(&self) {
        self.sessions_in_flight.dec();
    }

    pub fn record_export_evicted(&self, count: u64) {
        self.export_evicted_total.inc_by(count);
    }

    pub fn record_export_failure(&self) {
        self.export_failures_total.inc();
    }

    pub fn record_export_batch(&self) {
        self.export_batches_total.inc();
    }

    pub fn record_export_discarded(&self, count: u64) {
        self.export_discarded_total.inc_by(count);
    }
}
