//! Telemetry configuration
//!
//! Settings are read from standard `OTEL_*` variables plus `TRACEHOOK_*`
//! variables for the engine itself. Unparseable values keep their defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracehook_pii::config::parse_flag;
use tracehook_pii::{PolicyError, RedactionConfig, RedactionLimits, RedactionPolicy};

/// OTLP wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

impl OtlpProtocol {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "grpc" => Some(OtlpProtocol::Grpc),
            "http" | "http/protobuf" | "http_protobuf" => Some(OtlpProtocol::HttpProtobuf),
            _ => None,
        }
    }
}

/// Trace sampler selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ratio")]
pub enum SamplerKind {
    AlwaysOn,
    AlwaysOff,
    TraceIdRatio(f64),
    ParentBasedTraceIdRatio(f64),
}

impl SamplerKind {
    fn parse(raw: &str, ratio: f64) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always_on" | "parentbased_always_on" => Some(SamplerKind::AlwaysOn),
            "always_off" | "parentbased_always_off" => Some(SamplerKind::AlwaysOff),
            "traceidratio" => Some(SamplerKind::TraceIdRatio(ratio)),
            "parentbased_traceidratio" => Some(SamplerKind::ParentBasedTraceIdRatio(ratio)),
            _ => None,
        }
    }
}

/// Export queue and batching settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,

    #[serde(default = "default_schedule_delay_ms")]
    pub schedule_delay_ms: u64,
}

impl ExportSettings {
    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn schedule_delay(&self) -> Duration {
        Duration::from_millis(self.schedule_delay_ms)
    }

    /// Capacity and batch size are at least 1, batch size never exceeds capacity
    pub fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.max_batch_size = self.max_batch_size.clamp(1, self.queue_capacity);
        self.schedule_delay_ms = self.schedule_delay_ms.max(1);
        self
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_batch_size: default_max_batch_size(),
            export_timeout_ms: default_export_timeout_ms(),
            schedule_delay_ms: default_schedule_delay_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    2048
}

fn default_max_batch_size() -> usize {
    512
}

fn default_export_timeout_ms() -> u64 {
    30_000
}

fn default_schedule_delay_ms() -> u64 {
    5_000
}

/// Full telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_protocol")]
    pub protocol: OtlpProtocol,

    /// Per-request timeout of the OTLP client
    #[serde(default = "default_exporter_timeout_ms")]
    pub exporter_timeout_ms: u64,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_service_namespace")]
    pub service_namespace: String,

    #[serde(default)]
    pub resource_attributes: Vec<(String, String)>,

    #[serde(default = "default_true")]
    pub traces_enabled: bool,

    #[serde(default = "default_true")]
    pub logs_enabled: bool,

    #[serde(default)]
    pub metrics_enabled: bool,

    #[serde(default = "default_sampler")]
    pub sampler: SamplerKind,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Window in which a second interrupt force-closes the session
    #[serde(default = "default_interrupt_window_ms")]
    pub interrupt_window_ms: u64,

    #[serde(default = "default_max_attr_length")]
    pub max_attr_length: usize,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default)]
    pub debug: bool,
}

fn default_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_protocol() -> OtlpProtocol {
    OtlpProtocol::Grpc
}

fn default_exporter_timeout_ms() -> u64 {
    10_000
}

fn default_service_name() -> String {
    "agent-cli".to_string()
}

fn default_service_namespace() -> String {
    "tracehook".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sampler() -> SamplerKind {
    SamplerKind::AlwaysOn
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_interrupt_window_ms() -> u64 {
    2_000
}

fn default_max_attr_length() -> usize {
    RedactionLimits::default().max_attr_length
}

fn default_max_payload_bytes() -> usize {
    RedactionLimits::default().max_payload_bytes
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            protocol: default_protocol(),
            exporter_timeout_ms: default_exporter_timeout_ms(),
            service_name: default_service_name(),
            service_namespace: default_service_namespace(),
            resource_attributes: Vec::new(),
            traces_enabled: true,
            logs_enabled: true,
            metrics_enabled: false,
            sampler: default_sampler(),
            export: ExportSettings::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            interrupt_window_ms: default_interrupt_window_ms(),
            max_attr_length: default_max_attr_length(),
            max_payload_bytes: default_max_payload_bytes(),
            debug: false,
        }
    }
}

impl TelemetryConfig {
    /// Load from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through a variable lookup, starting from defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.merge_lookup(&lookup);
        config
    }

    /// Override fields with any variables the lookup provides
    pub fn merge_lookup<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Exporter endpoint
        if let Some(val) = get("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.endpoint = val;
        }
        if let Some(val) = get("OTEL_EXPORTER_OTLP_PROTOCOL") {
            match OtlpProtocol::parse(&val) {
                Some(protocol) => self.protocol = protocol,
                None => tracing::warn!("Invalid OTEL_EXPORTER_OTLP_PROTOCOL '{}', using default", val),
            }
        }
        parse_into(&get, "OTEL_EXPORTER_OTLP_TIMEOUT", &mut self.exporter_timeout_ms);

        // Resource
        if let Some(val) = get("OTEL_SERVICE_NAME") {
            self.service_name = val;
        }
        if let Some(val) = get("OTEL_SERVICE_NAMESPACE") {
            self.service_namespace = val;
        }
        if let Some(val) = get("OTEL_RESOURCE_ATTRIBUTES") {
            self.resource_attributes = parse_resource_attributes(&val);
        }

        // Signal toggles
        if let Some(val) = get("OTEL_TRACES_EXPORTER") {
            self.traces_enabled = exporter_enabled(&val);
        }
        if let Some(val) = get("OTEL_LOGS_EXPORTER") {
            self.logs_enabled = exporter_enabled(&val);
        }
        if let Some(val) = get("OTEL_METRICS_EXPORTER") {
            self.metrics_enabled = exporter_enabled(&val);
        }

        // Sampling
        let ratio = get("OTEL_TRACES_SAMPLER_ARG")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        if let Some(val) = get("OTEL_TRACES_SAMPLER") {
            match SamplerKind::parse(&val, ratio) {
                Some(sampler) => self.sampler = sampler,
                None => tracing::warn!("Invalid OTEL_TRACES_SAMPLER '{}', using default", val),
            }
        }

        // Batching
        parse_into(&get, "OTEL_BSP_MAX_QUEUE_SIZE", &mut self.export.queue_capacity);
        parse_into(&get, "OTEL_BSP_MAX_EXPORT_BATCH_SIZE", &mut self.export.max_batch_size);
        parse_into(&get, "OTEL_BSP_EXPORT_TIMEOUT", &mut self.export.export_timeout_ms);
        parse_into(&get, "OTEL_BSP_SCHEDULE_DELAY", &mut self.export.schedule_delay_ms);
        self.export = self.export.normalized();

        // Engine settings
        parse_into(&get, "TRACEHOOK_SHUTDOWN_TIMEOUT_MS", &mut self.shutdown_timeout_ms);
        parse_into(&get, "TRACEHOOK_INTERRUPT_WINDOW_MS", &mut self.interrupt_window_ms);
        parse_into(&get, "TRACEHOOK_MAX_ATTR_LENGTH", &mut self.max_attr_length);
        parse_into(&get, "TRACEHOOK_MAX_PAYLOAD_BYTES", &mut self.max_payload_bytes);

        if let Some(val) = get("TRACEHOOK_DEBUG") {
            self.debug = parse_flag(&val).unwrap_or(false);
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn interrupt_window(&self) -> Duration {
        Duration::from_millis(self.interrupt_window_ms)
    }

    pub fn exporter_timeout(&self) -> Duration {
        Duration::from_millis(self.exporter_timeout_ms)
    }

    pub fn redaction_limits(&self) -> RedactionLimits {
        RedactionLimits {
            max_attr_length: self.max_attr_length,
            max_payload_bytes: self.max_payload_bytes,
        }
    }

    /// Load redaction rules through the same lookup and compile them leniently.
    /// Invalid patterns and unreadable config files come back as warnings.
    pub fn load_redaction_policy<F>(&self, lookup: F) -> (RedactionPolicy, Vec<PolicyError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let (rules, mut warnings) = RedactionConfig::load(lookup);
        let (policy, compile_warnings) = RedactionPolicy::compile_lenient(&rules, self.redaction_limits());
        warnings.extend(compile_warnings);
        (policy, warnings)
    }
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(val) = get(key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Invalid {} '{}', using default", key, val),
        }
    }
}

fn exporter_enabled(raw: &str) -> bool {
    !raw.trim().eq_ignore_ascii_case("none")
}

fn parse_resource_attributes(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}
