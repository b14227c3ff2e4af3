//! Span and metric records
//!
//! Finished records are the unit of export. Text attributes can only be set
//! from `Sanitized` values, either passed in directly or produced by running
//! raw text through a `RedactionPolicy` on insert.

use crate::usage::TokenCounts;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tracehook_pii::{RedactionPolicy, Sanitized};

/// 128-bit trace id shared by every record of one session
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Random non-zero id
    pub fn random() -> Self {
        Self(rand::random::<u128>().max(1))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn to_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span id
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Random non-zero id
    pub fn random() -> Self {
        Self(rand::random::<u64>().max(1))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What a span record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Session,
    Turn,
    Tool,
    /// Standalone point-in-time record such as a compaction
    Event,
}

/// Final status of a span
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error(Sanitized),
}

impl SpanStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(Sanitized),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Ordered attribute list; setting an existing key replaces its value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) -> &mut Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Redact and bound raw text with the policy's attribute budget
    pub fn text(&mut self, key: impl Into<String>, raw: &str, policy: &RedactionPolicy) -> &mut Self {
        self.set(key, AttributeValue::Text(policy.sanitize(raw)))
    }

    pub fn text_with_budget(
        &mut self,
        key: impl Into<String>,
        raw: &str,
        budget: usize,
        policy: &RedactionPolicy,
    ) -> &mut Self {
        self.set(key, AttributeValue::Text(policy.sanitize_with_budget(raw, budget)))
    }

    pub fn sanitized(&mut self, key: impl Into<String>, value: Sanitized) -> &mut Self {
        self.set(key, AttributeValue::Text(value))
    }

    pub fn int(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.set(key, AttributeValue::Int(value))
    }

    /// Unsigned counters, saturating at `i64::MAX`
    pub fn count(&mut self, key: impl Into<String>, value: u64) -> &mut Self {
        self.int(key, i64::try_from(value).unwrap_or(i64::MAX))
    }

    pub fn float(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.set(key, AttributeValue::Float(value))
    }

    pub fn bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.set(key, AttributeValue::Bool(value))
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttributeValue::as_text)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(AttributeValue::as_int)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for AttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(k, v)| (k, v)))
    }
}

/// Timestamped annotation on a span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: AttributeSet,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            timestamp,
            attributes: AttributeSet::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A finished session, turn, tool or event span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub kind: SpanKind,
    pub name: Sanitized,
    pub session_id: Sanitized,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SpanStatus,
    pub attributes: AttributeSet,
    pub events: Vec<SpanEvent>,
}

impl SpanRecord {
    /// Open a record; `finish` sets the end time and status.
    ///
    /// Names and session ids come from caller payloads, so both must already
    /// be sanitized.
    pub fn new(
        kind: SpanKind,
        name: Sanitized,
        session_id: Sanitized,
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            name,
            session_id,
            trace_id,
            span_id: SpanId::random(),
            parent_span_id,
            start_time,
            end_time: start_time,
            status: SpanStatus::Unset,
            attributes: AttributeSet::new(),
            events: Vec::new(),
        }
    }

    /// Close the record. An end time before the start is clamped to the start.
    pub fn finish(&mut self, end_time: DateTime<Utc>, status: SpanStatus) {
        self.end_time = end_time.max(self.start_time);
        self.status = status;
    }

    pub fn add_event(&mut self, event: SpanEvent) {
        self.events.push(event);
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration()
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or_else(|| self.duration().num_milliseconds() as f64)
    }
}

/// One metric update, mirrored from the recorder for export.
///
/// Label values become metric attributes, so they carry `Sanitized` text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum MetricDelta {
    ToolCall {
        tool_name: Sanitized,
        duration_ms: f64,
        error: bool,
    },
    Turn {
        model: Sanitized,
    },
    CacheUsage {
        model: Sanitized,
        cache_read: u64,
        cache_creation: u64,
    },
    ModelRequest {
        model: Sanitized,
    },
    Compaction {
        trigger: Sanitized,
        model: Sanitized,
    },
    Tokens {
        model: Sanitized,
        usage: TokenCounts,
    },
    PromptLatency {
        model: Sanitized,
        latency_ms: f64,
    },
}

/// Severity of an exported log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Info => "INFO",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERROR",
        }
    }
}

/// A structured log line correlated with a span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    pub body: Sanitized,
    pub session_id: Sanitized,
    pub trace_id: TraceId,
    pub span_id: Option<SpanId>,
    pub attributes: AttributeSet,
}

impl LogRecord {
    pub fn new(
        severity: LogSeverity,
        body: Sanitized,
        session_id: Sanitized,
        trace_id: TraceId,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            body,
            session_id,
            trace_id,
            span_id: None,
            attributes: AttributeSet::new(),
        }
    }

    /// Log record attached to a finished span
    pub fn for_span(severity: LogSeverity, body: Sanitized, span: &SpanRecord) -> Self {
        Self {
            timestamp: span.end_time,
            severity,
            body,
            session_id: span.session_id.clone(),
            trace_id: span.trace_id,
            span_id: Some(span.span_id),
            attributes: AttributeSet::new(),
        }
    }
}

/// Anything the export pipeline carries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExportPayload {
    Span(SpanRecord),
    Metric(MetricDelta),
    Log(LogRecord),
}

impl ExportPayload {
    pub fn as_span(&self) -> Option<&SpanRecord> {
        match self {
            ExportPayload::Span(span) => Some(span),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricDelta> {
        match self {
            ExportPayload::Metric(metric) => Some(metric),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&LogRecord> {
        match self {
            ExportPayload::Log(log) => Some(log),
            _ => None,
        }
    }
}

impl From<SpanRecord> for ExportPayload {
    fn from(span: SpanRecord) -> Self {
        ExportPayload::Span(span)
    }
}

impl From<MetricDelta> for ExportPayload {
    fn from(metric: MetricDelta) -> Self {
        ExportPayload::Metric(metric)
    }
}

impl From<LogRecord> for ExportPayload {
    fn from(log: LogRecord) -> Self {
        ExportPayload::Log(log)
    }
}

/// A payload waiting in the export queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportQueueItem {
    pub payload: ExportPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl ExportQueueItem {
    pub fn new(payload: impl Into<ExportPayload>) -> Self {
        Self {
            payload: payload.into(),
            enqueued_at: Utc::now(),
        }
    }
}
