//! OpenTelemetry provider setup
//!
//! Builds the tracer, logger and meter providers from a `TelemetryConfig`:
//! - Resource with service name, namespace and extra resource attributes
//! - Sampler from `OTEL_TRACES_SAMPLER` / `OTEL_TRACES_SAMPLER_ARG`
//! - OTLP span, log and metric exporters over gRPC or HTTP/protobuf
//!
//! Records are converted to OpenTelemetry key/values here as well.

use opentelemetry::logs::{AnyValue, Severity};
use opentelemetry::trace::Status;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use thiserror::Error;
use tracehook_core::config::{OtlpProtocol, SamplerKind};
use tracehook_core::{AttributeSet, AttributeValue, LogSeverity, SpanStatus, TelemetryConfig};

/// Name of the instrumentation scope used for tracers and meters
pub const INSTRUMENTATION_SCOPE: &str = "tracehook";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("Provider shutdown failed: {0}")]
    Shutdown(String),
}

/// Tracer, logger and meter providers for one process run
#[derive(Debug, Clone)]
pub struct TelemetryProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: Option<SdkLoggerProvider>,
    pub meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryProviders {
    /// Build providers with OTLP exporters.
    ///
    /// Traces get an exporter only when the traces exporter is enabled. The
    /// logger and meter providers exist only when their exporters are enabled.
    pub fn init(config: &TelemetryConfig) -> Result<Self, ProviderError> {
        let resource = build_resource(config);

        let mut tracer_builder = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_sampler(build_sampler(config.sampler))
            .with_id_generator(RandomIdGenerator::default());

        if config.traces_enabled {
            tracer_builder = tracer_builder.with_batch_exporter(build_span_exporter(config)?);
        }

        let logger_provider = if config.logs_enabled {
            Some(
                SdkLoggerProvider::builder()
                    .with_resource(resource.clone())
                    .with_batch_exporter(build_log_exporter(config)?)
                    .build(),
            )
        } else {
            None
        };

        let meter_provider = if config.metrics_enabled {
            Some(
                SdkMeterProvider::builder()
                    .with_resource(resource)
                    .with_periodic_exporter(build_metric_exporter(config)?)
                    .build(),
            )
        } else {
            None
        };

        Ok(Self {
            tracer_provider: tracer_builder.build(),
            logger_provider,
            meter_provider,
        })
    }

    /// Wrap already built providers
    pub fn from_parts(
        tracer_provider: SdkTracerProvider,
        meter_provider: Option<SdkMeterProvider>,
    ) -> Self {
        Self {
            tracer_provider,
            logger_provider: None,
            meter_provider,
        }
    }

    pub fn with_logger_provider(mut self, logger_provider: SdkLoggerProvider) -> Self {
        self.logger_provider = Some(logger_provider);
        self
    }

    /// Flush every provider, reporting the first failure
    pub fn force_flush(&self) -> Result<(), ProviderError> {
        self.tracer_provider
            .force_flush()
            .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        if let Some(logger_provider) = &self.logger_provider {
            logger_provider
                .force_flush()
                .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        }
        if let Some(meter_provider) = &self.meter_provider {
            meter_provider
                .force_flush()
                .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        }
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), ProviderError> {
        self.tracer_provider
            .shutdown()
            .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        if let Some(logger_provider) = &self.logger_provider {
            logger_provider
                .shutdown()
                .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        }
        if let Some(meter_provider) = &self.meter_provider {
            meter_provider
                .shutdown()
                .map_err(|e| ProviderError::Shutdown(e.to_string()))?;
        }
        Ok(())
    }
}

/// Resource describing this service
pub fn build_resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.namespace", config.service_namespace.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    attributes.extend(
        config
            .resource_attributes
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
    );

    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes(attributes)
        .build()
}

/// Map the configured sampler to the SDK sampler
pub fn build_sampler(kind: SamplerKind) -> Sampler {
    match kind {
        SamplerKind::AlwaysOn => Sampler::AlwaysOn,
        SamplerKind::AlwaysOff => Sampler::AlwaysOff,
        SamplerKind::TraceIdRatio(ratio) => ratio_sampler(ratio),
        SamplerKind::ParentBasedTraceIdRatio(ratio) => {
            Sampler::ParentBased(Box::new(ratio_sampler(ratio)))
        }
    }
}

fn ratio_sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn build_span_exporter(
    config: &TelemetryConfig,
) -> Result<opentelemetry_otlp::SpanExporter, ProviderError> {
    let builder = opentelemetry_otlp::SpanExporter::builder();
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => builder
            .with_tonic()
            .with_endpoint(config.endpoint.clone())
            .with_timeout(config.exporter_timeout())
            .build(),
        OtlpProtocol::HttpProtobuf => builder
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(http_endpoint(&config.endpoint, "v1/traces"))
            .with_timeout(config.exporter_timeout())
            .build(),
    };
    exporter.map_err(|e| ProviderError::Exporter(e.to_string()))
}

fn build_log_exporter(
    config: &TelemetryConfig,
) -> Result<opentelemetry_otlp::LogExporter, ProviderError> {
    let builder = opentelemetry_otlp::LogExporter::builder();
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => builder
            .with_tonic()
            .with_endpoint(config.endpoint.clone())
            .with_timeout(config.exporter_timeout())
            .build(),
        OtlpProtocol::HttpProtobuf => builder
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(http_endpoint(&config.endpoint, "v1/logs"))
            .with_timeout(config.exporter_timeout())
            .build(),
    };
    exporter.map_err(|e| ProviderError::Exporter(e.to_string()))
}

fn build_metric_exporter(
    config: &TelemetryConfig,
) -> Result<opentelemetry_otlp::MetricExporter, ProviderError> {
    let builder = opentelemetry_otlp::MetricExporter::builder();
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => builder
            .with_tonic()
            .with_endpoint(config.endpoint.clone())
            .with_timeout(config.exporter_timeout())
            .build(),
        OtlpProtocol::HttpProtobuf => builder
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(http_endpoint(&config.endpoint, "v1/metrics"))
            .with_timeout(config.exporter_timeout())
            .build(),
    };
    exporter.map_err(|e| ProviderError::Exporter(e.to_string()))
}

/// HTTP exporters take the full signal URL when an endpoint is set explicitly
fn http_endpoint(base: &str, signal_path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(signal_path) {
        base.to_string()
    } else {
        format!("{base}/{signal_path}")
    }
}

/// Convert a sanitized attribute set to OpenTelemetry key/values
pub fn to_key_values(attributes: &AttributeSet) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue::new(key.to_string(), to_otel_value(value)))
        .collect()
}

fn to_otel_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Text(s) => Value::from(s.as_str().to_string()),
        AttributeValue::Int(i) => Value::I64(*i),
        AttributeValue::Float(f) => Value::F64(*f),
        AttributeValue::Bool(b) => Value::Bool(*b),
    }
}

/// Log attributes use the log data model's value type
pub fn to_any_values(attributes: &AttributeSet) -> Vec<(String, AnyValue)> {
    attributes
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AttributeValue::Text(s) => AnyValue::from(s.as_str().to_string()),
                AttributeValue::Int(i) => AnyValue::Int(*i),
                AttributeValue::Float(f) => AnyValue::Double(*f),
                AttributeValue::Bool(b) => AnyValue::Boolean(*b),
            };
            (key.to_string(), value)
        })
        .collect()
}

pub fn to_otel_severity(severity: LogSeverity) -> Severity {
    match severity {
        LogSeverity::Info => Severity::Info,
        LogSeverity::Warn => Severity::Warn,
        LogSeverity::Error => Severity::Error,
    }
}

/// Convert a record status
pub fn to_otel_status(status: &SpanStatus) -> Status {
    match status {
        SpanStatus::Unset => Status::Unset,
        SpanStatus::Ok => Status::Ok,
        SpanStatus::Error(message) => Status::error(message.as_str().to_string()),
    }
}
