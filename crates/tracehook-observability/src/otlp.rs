//! OTLP export transport
//!
//! Finished records already carry their own ids and timestamps, so each one is
//! replayed into the SDK tracer with those values instead of starting a live
//! span. Log records are emitted through the SDK logger with the same trace
//! context, and metric deltas are applied to OpenTelemetry instruments. Both
//! only happen when the matching provider is configured.

use crate::tracing::{
    INSTRUMENTATION_SCOPE, TelemetryProviders, to_any_values, to_key_values, to_otel_severity,
    to_otel_status,
};
use async_trait::async_trait;
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
use opentelemetry::trace::{
    Event, Span, SpanContext, SpanId, SpanKind, TraceContextExt, TraceFlags, TraceId, TraceState,
    Tracer, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use std::time::SystemTime;
use tracehook_core::{
    ExportPayload, ExportTransport, LogRecord, MetricDelta, SpanRecord, TransportError,
};

/// Export transport backed by the OpenTelemetry SDK
pub struct OtlpTransport {
    providers: TelemetryProviders,
    instruments: Option<Instruments>,
}

impl OtlpTransport {
    pub fn new(providers: TelemetryProviders) -> Self {
        let instruments = providers
            .meter_provider
            .as_ref()
            .map(|mp| Instruments::new(&mp.meter(INSTRUMENTATION_SCOPE)));
        Self {
            providers,
            instruments,
        }
    }

    pub fn providers(&self) -> &TelemetryProviders {
        &self.providers
    }

    fn emit_span(&self, record: &SpanRecord) {
        let tracer = self.providers.tracer_provider.tracer(INSTRUMENTATION_SCOPE);
        let trace_id = TraceId::from_bytes(record.trace_id.to_u128().to_be_bytes());

        let parent_cx = match record.parent_span_id {
            Some(parent) => Context::new().with_remote_span_context(SpanContext::new(
                trace_id,
                SpanId::from_bytes(parent.to_u64().to_be_bytes()),
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            )),
            None => Context::new(),
        };

        let events = record
            .events
            .iter()
            .map(|event| {
                Event::new(
                    event.name.clone(),
                    SystemTime::from(event.timestamp),
                    to_key_values(&event.attributes),
                    0,
                )
            })
            .collect();

        let mut span = tracer
            .span_builder(record.name.to_string())
            .with_kind(SpanKind::Internal)
            .with_trace_id(trace_id)
            .with_span_id(SpanId::from_bytes(record.span_id.to_u64().to_be_bytes()))
            .with_start_time(SystemTime::from(record.start_time))
            .with_attributes(to_key_values(&record.attributes))
            .with_events(events)
            .start_with_context(&tracer, &parent_cx);

        span.set_status(to_otel_status(&record.status));
        span.end_with_timestamp(SystemTime::from(record.end_time));
    }

    fn emit_log(&self, record: &LogRecord) {
        let Some(logger_provider) = &self.providers.logger_provider else {
            return;
        };
        let logger = logger_provider.logger(INSTRUMENTATION_SCOPE);
        let mut log = logger.create_log_record();

        let timestamp = SystemTime::from(record.timestamp);
        log.set_timestamp(timestamp);
        log.set_observed_timestamp(timestamp);
        log.set_severity_number(to_otel_severity(record.severity));
        log.set_severity_text(record.severity.as_str());
        log.set_body(AnyValue::from(record.body.to_string()));
        log.add_attribute("session.id", record.session_id.to_string());
        log.add_attributes(to_any_values(&record.attributes));
        if let Some(span_id) = record.span_id {
            log.set_trace_context(
                TraceId::from_bytes(record.trace_id.to_u128().to_be_bytes()),
                SpanId::from_bytes(span_id.to_u64().to_be_bytes()),
                Some(TraceFlags::SAMPLED),
            );
        }
        logger.emit(log);
    }
}

#[async_trait]
impl ExportTransport for OtlpTransport {
    async fn export(&self, batch: Vec<ExportPayload>) -> Result<(), TransportError> {
        for payload in &batch {
            match payload {
                ExportPayload::Span(record) => self.emit_span(record),
                ExportPayload::Log(record) => self.emit_log(record),
                ExportPayload::Metric(delta) => {
                    if let Some(instruments) = &self.instruments {
                        instruments.apply(delta);
                    }
                }
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        // Provider flushes block on the exporter
        let providers = self.providers.clone();
        tokio::task::spawn_blocking(move || providers.force_flush())
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
            .map_err(|e| TransportError::Unavailable(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "otlp"
    }
}

/// OpenTelemetry instruments mirroring the Prometheus recorder
struct Instruments {
    tool_calls: Counter<u64>,
    tool_errors: Counter<u64>,
    tool_duration: Histogram<f64>,
    turns: Counter<u64>,
    model_requests: Counter<u64>,
    cache_hits: Counter<u64>,
    cache_misses: Counter<u64>,
    cache_creations: Counter<u64>,
    compactions: Counter<u64>,
    tokens: Counter<u64>,
    prompt_latency: Histogram<f64>,
}

impl Instruments {
    fn new(meter: &Meter) -> Self {
        Self {
            tool_calls: meter
                .u64_counter("tool_calls_total")
                .with_description("Total number of tool calls")
                .build(),
            tool_errors: meter
                .u64_counter("tool_calls_errors_total")
                .with_description("Tool calls that reported an error")
                .build(),
            tool_duration: meter
                .f64_histogram("tool_call_duration_ms")
                .with_unit("ms")
                .build(),
            turns: meter.u64_counter("turns_total").build(),
            model_requests: meter.u64_counter("model_requests_total").build(),
            cache_hits: meter.u64_counter("cache_hits_total").build(),
            cache_misses: meter.u64_counter("cache_misses_total").build(),
            cache_creations: meter.u64_counter("cache_creations_total").build(),
            compactions: meter.u64_counter("context_compactions_total").build(),
            tokens: meter.u64_counter("tokens_total").build(),
            prompt_latency: meter
                .f64_histogram("prompt_latency_ms")
                .with_unit("ms")
                .build(),
        }
    }

    fn apply(&self, delta: &MetricDelta) {
        match delta {
            MetricDelta::ToolCall {
                tool_name,
                duration_ms,
                error,
            } => {
                let attrs = [KeyValue::new("tool.name", tool_name.to_string())];
                self.tool_calls.add(1, &attrs);
                if *error {
                    self.tool_errors.add(1, &attrs);
                }
                self.tool_duration.record(duration_ms.max(0.0), &attrs);
            }
            MetricDelta::Turn { model } => self.turns.add(1, &[model_attr(model.as_str())]),
            MetricDelta::CacheUsage {
                model,
                cache_read,
                cache_creation,
            } => {
                let attrs = [model_attr(model.as_str())];
                if *cache_read > 0 {
                    self.cache_hits.add(1, &attrs);
                } else {
                    self.cache_misses.add(1, &attrs);
                }
                if *cache_creation > 0 {
                    self.cache_creations.add(1, &attrs);
                }
            }
            MetricDelta::ModelRequest { model } => self.model_requests.add(1, &[model_attr(model.as_str())]),
            MetricDelta::Compaction { trigger, model } => self.compactions.add(
                1,
                &[KeyValue::new("trigger", trigger.to_string()), model_attr(model.as_str())],
            ),
            MetricDelta::Tokens { model, usage } => {
                let kinds = [
                    ("input", usage.input_tokens),
                    ("output", usage.output_tokens),
                    ("cache_read", usage.cache_read_input_tokens),
                    ("cache_creation", usage.cache_creation_input_tokens),
                ];
                for (kind, count) in kinds {
                    if count > 0 {
                        self.tokens
                            .add(count, &[model_attr(model.as_str()), KeyValue::new("kind", kind)]);
                    }
                }
            }
            MetricDelta::PromptLatency { model, latency_ms } => self
                .prompt_latency
                .record(latency_ms.max(0.0), &[model_attr(model.as_str())]),
        }
    }
}

fn model_attr(model: &str) -> KeyValue {
    KeyValue::new("model", model.to_string())
}
