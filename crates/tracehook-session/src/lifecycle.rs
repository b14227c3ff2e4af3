//! Session lifecycle manager
//!
//! Drives one session from its first hook to close:
//!
//! ```text
//! Idle --start--> Active --stop / second interrupt--> Closing --drain--> Closed
//! ```
//!
//! Turn, tool, compaction and single interrupt hooks keep the session
//! `Active`. Every text attribute goes through the redaction policy before it
//! is stored on a record. Finished records and metric deltas go to the export
//! pipeline; nothing here waits on the backend except the bounded drain at
//! close.
//!
//! Session state sits behind a `std::sync::Mutex` that is never held across
//! an await. Open tool invocations live in the lock-free `ToolTracker` so
//! concurrent tool hooks do not contend on the session lock.

use crate::export::{DrainReport, ExportPipeline};
use crate::tool_tracker::{PendingTool, ToolTracker};
use crate::transcript::read_transcript;
use crate::usage::{RealTimeOutcome, TokenAggregator};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracehook_core::events::{Compaction, PromptSubmit, ToolEnd, ToolStart};
use tracehook_core::{
    AttributeSet, Error, ExportTransport, LogRecord, LogSeverity, MetricDelta, Result, SpanEvent,
    SpanId, SpanKind, SpanRecord, SpanStatus, TelemetryConfig, TokenCounts, TraceId, UsageSource,
};
use tracehook_observability::Metrics;
use tracehook_pii::{RedactionPolicy, Sanitized};

const UNKNOWN_MODEL: &str = "unknown";
const GEN_AI_SYSTEM: &str = "anthropic";
/// Characters of the first prompt used in the session span name
const PROMPT_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closing,
    Closed,
}

/// Terminal status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ok,
    Error,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ok => "ok",
            SessionStatus::Error => "error",
            SessionStatus::Interrupted => "interrupted",
        }
    }

    fn span_status(&self) -> SpanStatus {
        match self {
            SessionStatus::Ok => SpanStatus::Ok,
            SessionStatus::Error => SpanStatus::Error(Sanitized::from_static("session failed")),
            SessionStatus::Interrupted => SpanStatus::Unset,
        }
    }
}

/// Summary returned when a session closes
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub totals: TokenCounts,
    pub usage_source: Option<UsageSource>,
    pub turns: u32,
    pub tools_used: u64,
    pub orphaned_tools: usize,
    pub drain: DrainReport,
    /// Recovered faults worth surfacing in debug mode
    pub warnings: Vec<String>,
}

/// What a single interrupt did
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptOutcome {
    /// The current turn was marked cancelled
    TurnCancelled,
    /// A second interrupt inside the window closed the session
    SessionClosed(CloseReport),
    /// No active session
    Ignored,
}

struct OpenTurn {
    index: u32,
    record: SpanRecord,
    cancelled: bool,
    tool_ids: Vec<String>,
}

struct SessionContext {
    record: SpanRecord,
    model: Sanitized,
    response_model: Option<String>,
    prompt_seen: bool,
    turn: Option<OpenTurn>,
    turn_count: u32,
    tools_used: u64,
    tool_names: BTreeSet<String>,
    usage: TokenAggregator,
    last_turn_end: Option<Instant>,
    last_interrupt: Option<Instant>,
    started: Instant,
}

impl SessionContext {
    fn session_id(&self) -> &str {
        self.record.session_id.as_str()
    }

    /// Parent for tool and event records: the open turn, else the session
    fn current_parent(&self) -> SpanId {
        self.turn
            .as_ref()
            .map_or(self.record.span_id, |turn| turn.record.span_id)
    }
}

struct Inner {
    state: SessionState,
    session: Option<SessionContext>,
}

/// Lifecycle manager for one logical run of the wrapped agent
pub struct SessionManager {
    config: TelemetryConfig,
    policy: Arc<RedactionPolicy>,
    pipeline: Arc<ExportPipeline>,
    metrics: Option<Metrics>,
    tools: ToolTracker,
    inner: Mutex<Inner>,
    warnings: Mutex<Vec<String>>,
    closed: OnceCell<CloseReport>,
}

impl SessionManager {
    pub fn new(
        config: TelemetryConfig,
        policy: Arc<RedactionPolicy>,
        pipeline: Arc<ExportPipeline>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            config,
            policy,
            pipeline,
            metrics,
            tools: ToolTracker::new(),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                session: None,
            }),
            warnings: Mutex::new(Vec::new()),
            closed: OnceCell::new(),
        }
    }

    /// Build the redaction policy, metrics recorder and export pipeline from
    /// configuration. Must be called inside a tokio runtime.
    pub fn from_config<F>(
        config: TelemetryConfig,
        transport: Arc<dyn ExportTransport>,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (policy, policy_warnings) = config.load_redaction_policy(lookup);
        let metrics = match Metrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics recorder unavailable");
                None
            }
        };
        let pipeline = Arc::new(ExportPipeline::start(
            transport,
            config.export,
            metrics.clone(),
        ));

        let manager = Self::new(config, Arc::new(policy), pipeline, metrics);
        for warning in policy_warnings {
            let error = Error::RedactionPolicyInvalid(warning);
            tracing::warn!(error = %error, "Using fallback redaction rules");
            manager.add_warning(error.to_string());
        }
        manager
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock()
            .session
            .as_ref()
            .map(|ctx| ctx.session_id().to_string())
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn pipeline(&self) -> &Arc<ExportPipeline> {
        &self.pipeline
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    /// Number of tool invocations still waiting for their end hook
    pub fn open_tools(&self) -> usize {
        self.tools.len()
    }

    /// Record a recovered fault for the close report
    pub fn add_warning(&self, warning: impl Into<String>) {
        self.warnings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(warning.into());
    }

    /// Open the session. A missing id is replaced by a generated one.
    ///
    /// Only one start is allowed per manager; a second one is a caller error.
    pub fn start(&self, session_id: Option<&str>, model: Option<&str>) -> Result<String> {
        let mut inner = self.lock();
        if inner.state != SessionState::Idle {
            let existing = inner
                .session
                .as_ref()
                .map(|ctx| ctx.session_id().to_string())
                .unwrap_or_default();
            return Err(Error::DoubleSessionStart(existing));
        }

        let session_id = match session_id.filter(|id| !id.is_empty()) {
            Some(id) => self.policy.sanitize(id),
            None => self
                .policy
                .sanitize(&uuid::Uuid::new_v4().simple().to_string()),
        };
        let model = self
            .policy
            .sanitize(model.filter(|m| !m.is_empty()).unwrap_or(UNKNOWN_MODEL));

        let mut record = SpanRecord::new(
            SpanKind::Session,
            Sanitized::from_static("agent.session"),
            session_id.clone(),
            TraceId::random(),
            None,
            Utc::now(),
        );
        record
            .attributes
            .sanitized("session.id", session_id.clone())
            .text("gen_ai.system", GEN_AI_SYSTEM, &self.policy)
            .sanitized("gen_ai.request.model", model.clone());

        inner.session = Some(SessionContext {
            record,
            model,
            response_model: None,
            prompt_seen: false,
            turn: None,
            turn_count: 0,
            tools_used: 0,
            tool_names: BTreeSet::new(),
            usage: TokenAggregator::new(),
            last_turn_end: None,
            last_interrupt: None,
            started: Instant::now(),
        });
        inner.state = SessionState::Active;
        drop(inner);

        if let Some(metrics) = &self.metrics {
            metrics.session_opened();
        }
        tracing::debug!(session_id = %session_id, "Session started");
        Ok(session_id.into_string())
    }

    /// A user prompt opens a new turn. Starts the session if needed.
    pub fn prompt_submit(&self, event: &PromptSubmit) -> Result<()> {
        if self.state() == SessionState::Idle {
            // The SDK may not emit SessionStart
            match self.start(event.session_id.as_deref(), event.model.as_deref()) {
                Ok(_) | Err(Error::DoubleSessionStart(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let now = Utc::now();
        let mut deltas = Vec::new();
        let mut finished = Vec::new();
        {
            let mut inner = self.lock();
            let Some(ctx) = active_session(&mut inner) else {
                tracing::debug!("Prompt after session close ignored");
                return Ok(());
            };

            if let Some(model) = event.model.as_deref().filter(|m| !m.is_empty()) {
                ctx.model = self.policy.sanitize(model);
            }

            let prompt = self.policy.sanitize(&event.prompt);
            if !ctx.prompt_seen {
                ctx.prompt_seen = true;
                ctx.record.name = session_span_name(&prompt, &self.policy);
                ctx.record.attributes.sanitized("prompt", prompt.clone());
            }
            let mut attrs = AttributeSet::new();
            attrs.sanitized("prompt", prompt);
            ctx.record
                .add_event(SpanEvent::new("user.prompt.submitted", now).with_attributes(attrs));

            deltas.push(MetricDelta::ModelRequest {
                model: ctx.model.clone(),
            });
            if let Some(turn_end) = ctx.last_turn_end.take() {
                deltas.push(MetricDelta::PromptLatency {
                    model: ctx.model.clone(),
                    latency_ms: turn_end.elapsed().as_secs_f64() * 1000.0,
                });
            }

            self.begin_turn(ctx, now, &mut finished, &mut deltas);
        }

        self.emit(finished, deltas);
        Ok(())
    }

    /// Open a new turn, closing the current one first. Returns the new
    /// ordinal, or None when no session is active.
    pub fn turn_begin(&self) -> Option<u32> {
        let mut finished = Vec::new();
        let mut deltas = Vec::new();
        let index = {
            let mut inner = self.lock();
            let ctx = active_session(&mut inner)?;
            self.begin_turn(ctx, Utc::now(), &mut finished, &mut deltas)
        };
        self.emit(finished, deltas);
        Some(index)
    }

    /// Close the current turn with its real-time usage, if reported.
    ///
    /// A turn-complete signal without an open turn closes an implicit one so
    /// its usage is still counted. Returns the closed ordinal.
    pub fn turn_end(&self, usage: Option<TokenCounts>, model: Option<&str>) -> Option<u32> {
        let now = Utc::now();
        let mut finished = Vec::new();
        let mut deltas = Vec::new();
        let index = {
            let mut inner = self.lock();
            let ctx = active_session(&mut inner)?;
            if let Some(model) = model.filter(|m| !m.is_empty()) {
                ctx.response_model = Some(model.to_string());
            }
            if ctx.turn.is_none() {
                self.begin_turn(ctx, now, &mut finished, &mut deltas);
            }
            self.close_turn(ctx, usage, now, &mut finished, &mut deltas)
        };
        self.emit(finished, deltas);
        index
    }

    /// Open a tool invocation record.
    ///
    /// The tracker entry is registered while the session lock is held, so a
    /// concurrent close either drains it as an orphan or finds no session.
    pub fn tool_start(&self, event: &ToolStart) -> Result<()> {
        let now = Utc::now();
        let tool_name = self.policy.sanitize(&event.tool_name);
        let mut inner = self.lock();
        let Some(ctx) = active_session(&mut inner) else {
            tracing::debug!(tool = %tool_name, "Tool start without active session ignored");
            return Ok(());
        };
        if ctx.turn.as_ref().is_some_and(|turn| turn.cancelled) {
            tracing::debug!(tool = %tool_name, "Tool start in cancelled turn ignored");
            return Ok(());
        }

        ctx.tools_used += 1;
        ctx.tool_names.insert(tool_name.into_string());

        let mut record = SpanRecord::new(
            SpanKind::Tool,
            self.policy.sanitize(&format!("tool.{}", event.tool_name)),
            ctx.record.session_id.clone(),
            ctx.record.trace_id,
            Some(ctx.current_parent()),
            now,
        );
        self.tool_input_attributes(&mut record, event);
        let turn = ctx.turn.as_ref().map_or(0, |turn| turn.index);

        let key = self
            .tools
            .start(&event.tool_name, event.tool_use_id.as_deref(), turn, record);
        if let Some(open) = ctx.turn.as_mut() {
            open.tool_ids.push(key);
        }
        Ok(())
    }

    /// Close the matching tool invocation record
    pub fn tool_end(&self, event: &ToolEnd) -> Result<()> {
        let Some(pending) = self
            .tools
            .finish(&event.tool_name, event.tool_use_id.as_deref())
        else {
            tracing::debug!(
                tool = %self.policy.sanitize(&event.tool_name),
                "Tool end without matching start ignored"
            );
            return Ok(());
        };

        let tool_name = self.policy.sanitize(&event.tool_name);
        let record = self.finish_tool(pending, event);
        let delta = MetricDelta::ToolCall {
            tool_name: tool_name.clone(),
            duration_ms: record.duration_ms(),
            error: record.status.is_error(),
        };

        let mut logs = Vec::new();
        if self.config.logs_enabled {
            tracing::info!(
                tool = %tool_name,
                duration_ms = record.duration_ms(),
                status = record.attributes.get_text("tool.status").unwrap_or_default(),
                "Tool call completed"
            );
            logs.push(self.tool_log(&record, &tool_name));
        }

        self.emit(vec![record], vec![delta]);
        self.emit_logs(logs);
        Ok(())
    }

    /// Record a context compaction
    pub fn compaction(&self, event: &Compaction) -> Result<()> {
        let now = Utc::now();
        let (record, delta) = {
            let mut inner = self.lock();
            let Some(ctx) = active_session(&mut inner) else {
                tracing::debug!("Compaction without active session ignored");
                return Ok(());
            };

            let has_instructions = event
                .custom_instructions
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty());

            let mut attrs = AttributeSet::new();
            attrs
                .text("compaction.trigger", &event.trigger, &self.policy)
                .bool("compaction.has_custom_instructions", has_instructions);

            ctx.record.add_event(
                SpanEvent::new("context.compaction", now).with_attributes(attrs.clone()),
            );

            let mut record = SpanRecord::new(
                SpanKind::Event,
                Sanitized::from_static("context.compaction"),
                ctx.record.session_id.clone(),
                ctx.record.trace_id,
                Some(ctx.current_parent()),
                now,
            );
            record.attributes = attrs;
            record.finish(now, SpanStatus::Ok);

            let delta = MetricDelta::Compaction {
                trigger: self.policy.sanitize(&event.trigger),
                model: ctx.model.clone(),
            };
            (record, delta)
        };

        self.emit(vec![record], vec![delta]);
        Ok(())
    }

    /// Handle an interrupt signal.
    ///
    /// The first interrupt cancels the current turn. A second one inside the
    /// interrupt window closes the session with status `interrupted`.
    pub async fn interrupt(&self) -> InterruptOutcome {
        let window = self.config.interrupt_window();
        let force_close = {
            let mut inner = self.lock();
            let Some(ctx) = active_session(&mut inner) else {
                return InterruptOutcome::Ignored;
            };
            let now = Instant::now();
            let repeated = ctx
                .last_interrupt
                .is_some_and(|last| now.duration_since(last) <= window);

            if !repeated {
                ctx.last_interrupt = Some(now);
                let mut attrs = AttributeSet::new();
                if let Some(turn) = ctx.turn.as_mut() {
                    turn.cancelled = true;
                    attrs.int("turn.index", i64::from(turn.index));
                }
                ctx.record.add_event(
                    SpanEvent::new("session.interrupted", Utc::now()).with_attributes(attrs),
                );
            }
            repeated
        };

        if !force_close {
            tracing::debug!("Turn cancelled by interrupt");
            return InterruptOutcome::TurnCancelled;
        }

        match self.close(SessionStatus::Interrupted, None).await {
            Ok(report) => InterruptOutcome::SessionClosed(report),
            Err(e) => {
                tracing::debug!(error = %e, "Interrupt close failed");
                InterruptOutcome::Ignored
            }
        }
    }

    /// Close the session on the agent's stop hook.
    ///
    /// The transcript, when given, reconciles token usage. Closing twice
    /// returns the first report; stopping a session that never started is a
    /// caller error.
    pub async fn stop(&self, transcript: Option<&Path>) -> Result<CloseReport> {
        self.close(SessionStatus::Ok, transcript).await
    }

    /// Forced close at process exit. Without a started session only the
    /// export pipeline is drained.
    pub async fn shutdown(&self, status: SessionStatus) -> Option<CloseReport> {
        match self.close(status, None).await {
            Ok(report) => Some(report),
            Err(_) => {
                self.pipeline.shutdown(self.config.shutdown_timeout()).await;
                None
            }
        }
    }

    async fn close(&self, status: SessionStatus, transcript: Option<&Path>) -> Result<CloseReport> {
        if let Some(report) = self.closed.get() {
            return Ok(report.clone());
        }
        if self.state() == SessionState::Idle {
            return Err(Error::SessionNotStarted);
        }
        let report = self
            .closed
            .get_or_init(|| self.close_once(status, transcript))
            .await;
        Ok(report.clone())
    }

    async fn close_once(&self, status: SessionStatus, transcript: Option<&Path>) -> CloseReport {
        let now = Utc::now();
        let mut finished = Vec::new();
        let mut deltas = Vec::new();

        let mut ctx = {
            let mut inner = self.lock();
            inner.state = SessionState::Closing;
            match inner.session.take() {
                Some(ctx) => ctx,
                None => {
                    inner.state = SessionState::Closed;
                    return CloseReport {
                        session_id: String::new(),
                        status,
                        totals: TokenCounts::default(),
                        usage_source: None,
                        turns: 0,
                        tools_used: 0,
                        orphaned_tools: 0,
                        drain: DrainReport::default(),
                        warnings: self.take_warnings(),
                    };
                }
            }
        };

        if ctx.turn.is_some() {
            self.close_turn(&mut ctx, None, now, &mut finished, &mut deltas);
        }

        let orphans = self.tools.drain();
        let orphaned_tools = orphans.len();
        let mut logs = Vec::new();
        for pending in orphans {
            let tool_name = self.policy.sanitize(&pending.tool_name);
            let record = orphan_record(pending, now, &self.policy);
            if self.config.logs_enabled {
                logs.push(self.tool_log(&record, &tool_name));
            }
            finished.push(record);
        }

        if let Some(path) = transcript {
            self.reconcile_transcript(&mut ctx, path, &mut deltas).await;
        }

        let totals = ctx.usage.totals();
        let usage_source = ctx.usage.source();
        let session_id = ctx.session_id().to_string();
        let response_model = ctx
            .response_model
            .clone()
            .unwrap_or_else(|| ctx.model.to_string());
        let tool_names = ctx.tool_names.iter().cloned().collect::<Vec<_>>().join(",");
        let duration_ms = ctx.started.elapsed().as_secs_f64() * 1000.0;

        let attrs = &mut ctx.record.attributes;
        attrs
            .text("gen_ai.response.model", &response_model, &self.policy)
            .count("gen_ai.usage.input_tokens", totals.input_tokens)
            .count("gen_ai.usage.output_tokens", totals.output_tokens)
            .count("tokens.cache_read", totals.cache_read_input_tokens)
            .count("tokens.cache_creation", totals.cache_creation_input_tokens)
            .int("turns", i64::from(ctx.turn_count))
            .count("tools_used", ctx.tools_used)
            .text("tool_names", &tool_names, &self.policy)
            .float("session.duration_ms", duration_ms)
            .text("session.status", status.as_str(), &self.policy);
        if let Some(source) = usage_source {
            attrs.text("tokens.source", source.as_str(), &self.policy);
        }
        if let Some(reconciled) = ctx.usage.discrepancy() {
            attrs
                .count("tokens.reconciled.input", reconciled.input_tokens)
                .count("tokens.reconciled.output", reconciled.output_tokens);
        }
        ctx.record.add_event(SpanEvent::new("session.completed", now));
        ctx.record.finish(now, status.span_status());

        tracing::debug!(
            session_id = %session_id,
            status = status.as_str(),
            turns = ctx.turn_count,
            tools_used = ctx.tools_used,
            orphaned_tools,
            input_tokens = totals.input_tokens,
            output_tokens = totals.output_tokens,
            duration_ms,
            "Session closed"
        );

        let turns = ctx.turn_count;
        let tools_used = ctx.tools_used;
        finished.push(ctx.record);
        self.emit(finished, deltas);
        self.emit_logs(logs);
        if let Some(metrics) = &self.metrics {
            metrics.session_closed();
        }

        let drain = self.pipeline.shutdown(self.config.shutdown_timeout()).await;
        self.lock().state = SessionState::Closed;

        CloseReport {
            session_id,
            status,
            totals,
            usage_source,
            turns,
            tools_used,
            orphaned_tools,
            drain,
            warnings: self.take_warnings(),
        }
    }

    async fn reconcile_transcript(
        &self,
        ctx: &mut SessionContext,
        path: &Path,
        deltas: &mut Vec<MetricDelta>,
    ) {
        match read_transcript(path).await {
            Ok(transcript) => {
                if transcript.corrupt_lines > 0 {
                    self.add_warning(format!(
                        "transcript had {} corrupt lines",
                        transcript.corrupt_lines
                    ));
                }
                if ctx.response_model.is_none() {
                    ctx.response_model = transcript.model.clone();
                }
                let outcome = ctx.usage.reconcile(transcript.entries);
                if !outcome.added.is_zero() {
                    deltas.push(MetricDelta::Tokens {
                        model: ctx.model.clone(),
                        usage: outcome.added,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token reconciliation skipped");
                self.add_warning(e.to_string());
            }
        }
    }

    fn begin_turn(
        &self,
        ctx: &mut SessionContext,
        now: chrono::DateTime<Utc>,
        finished: &mut Vec<SpanRecord>,
        deltas: &mut Vec<MetricDelta>,
    ) -> u32 {
        if ctx.turn.is_some() {
            self.close_turn(ctx, None, now, finished, deltas);
        }
        ctx.turn_count += 1;
        let index = ctx.turn_count;

        let mut record = SpanRecord::new(
            SpanKind::Turn,
            Sanitized::from_static("agent.turn"),
            ctx.record.session_id.clone(),
            ctx.record.trace_id,
            Some(ctx.record.span_id),
            now,
        );
        record.attributes.int("turn.index", i64::from(index));
        ctx.turn = Some(OpenTurn {
            index,
            record,
            cancelled: false,
            tool_ids: Vec::new(),
        });
        index
    }

    fn close_turn(
        &self,
        ctx: &mut SessionContext,
        usage: Option<TokenCounts>,
        now: chrono::DateTime<Utc>,
        finished: &mut Vec<SpanRecord>,
        deltas: &mut Vec<MetricDelta>,
    ) -> Option<u32> {
        let OpenTurn {
            index,
            mut record,
            cancelled,
            tool_ids,
        } = ctx.turn.take()?;

        // A cancelled turn ignores late usage
        let usage = usage.filter(|_| !cancelled);
        if let Some(counts) = usage {
            if ctx.usage.record_real_time(index, counts) == RealTimeOutcome::Accepted {
                record
                    .attributes
                    .count("gen_ai.usage.input_tokens", counts.input_tokens)
                    .count("gen_ai.usage.output_tokens", counts.output_tokens)
                    .count("tokens.cache_read", counts.cache_read_input_tokens)
                    .count("tokens.cache_creation", counts.cache_creation_input_tokens);
                deltas.push(MetricDelta::Tokens {
                    model: ctx.model.clone(),
                    usage: counts,
                });
                deltas.push(MetricDelta::CacheUsage {
                    model: ctx.model.clone(),
                    cache_read: counts.cache_read_input_tokens,
                    cache_creation: counts.cache_creation_input_tokens,
                });
            }
        }

        record
            .attributes
            .count("turn.tool_count", tool_ids.len() as u64)
            .text("turn.tool_ids", &tool_ids.join(","), &self.policy)
            .bool("turn.cancelled", cancelled);
        record.finish(now, SpanStatus::Ok);

        let mut attrs = AttributeSet::new();
        attrs
            .int("turn.index", i64::from(index))
            .bool("turn.cancelled", cancelled);
        ctx.record
            .add_event(SpanEvent::new("turn.completed", now).with_attributes(attrs));

        deltas.push(MetricDelta::Turn {
            model: ctx.model.clone(),
        });
        ctx.last_turn_end = Some(Instant::now());
        finished.push(record);
        Some(index)
    }

    fn tool_input_attributes(&self, record: &mut SpanRecord, event: &ToolStart) {
        let rendered = render_payload(&event.tool_input);
        let (input, input_bytes) = self.policy.sanitize_payload(rendered.as_bytes());
        let truncated = input.was_truncated();

        let mut started = AttributeSet::new();
        started.sanitized("tool.input", input.clone());

        let attrs = &mut record.attributes;
        attrs
            .text("tool.name", &event.tool_name, &self.policy)
            .text("gen_ai.operation.name", "execute_tool", &self.policy)
            .sanitized("tool.input", input)
            .count("tool.input_bytes", input_bytes as u64)
            .bool("tool.input_truncated", truncated);
        if let Some(id) = event.tool_use_id.as_deref() {
            attrs.text("tool.use_id", id, &self.policy);
        }
        record.add_event(
            SpanEvent::new("tool.started", record.start_time).with_attributes(started),
        );
    }

    fn finish_tool(&self, pending: PendingTool, event: &ToolEnd) -> SpanRecord {
        let mut record = pending.record;
        let now = Utc::now();
        let error = event.is_error();

        let mut completed = AttributeSet::new();
        if let Some(response) = &event.tool_response {
            let rendered = render_payload(response);
            let (text, bytes) = self.policy.sanitize_payload(rendered.as_bytes());
            completed.sanitized("tool.response", text.clone());
            record
                .attributes
                .bool("tool.response_truncated", text.was_truncated())
                .sanitized("tool.response", text)
                .count("tool.response_bytes", bytes as u64);
        }

        let status = if error {
            let raw = event
                .error_message()
                .unwrap_or_else(|| "Tool execution failed".to_string());
            let message = self.policy.sanitize(&raw);
            record.attributes.sanitized("tool.error", message.clone());
            SpanStatus::Error(message)
        } else {
            SpanStatus::Ok
        };

        record.finish(now, status);
        let duration_ms = record.duration_ms();
        record
            .attributes
            .text("tool.status", if error { "error" } else { "success" }, &self.policy)
            .float("tool.duration_ms", duration_ms);
        completed.float("tool.duration_ms", duration_ms);
        record.add_event(
            SpanEvent::new("tool.completed", record.end_time).with_attributes(completed),
        );
        record
    }

    /// Log line for a finished or orphaned tool, correlated with its span
    fn tool_log(&self, record: &SpanRecord, tool_name: &Sanitized) -> LogRecord {
        let status = record.attributes.get_text("tool.status").unwrap_or("unknown");
        let severity = match status {
            "success" => LogSeverity::Info,
            "orphaned" => LogSeverity::Warn,
            _ => LogSeverity::Error,
        };
        let body = self.policy.sanitize(&format!("Tool {tool_name} {status}"));

        let mut log = LogRecord::for_span(severity, body, record);
        log.attributes
            .sanitized("tool.name", tool_name.clone())
            .text("tool.status", status, &self.policy)
            .float("tool.duration_ms", record.duration_ms());
        if let Some(id) = record.attributes.get("tool.use_id").cloned() {
            log.attributes.set("tool.use_id", id);
        }
        log
    }

    /// Hand finished records and metric deltas to the recorder and pipeline
    fn emit(&self, records: Vec<SpanRecord>, deltas: Vec<MetricDelta>) {
        for delta in deltas {
            if let Some(metrics) = &self.metrics {
                metrics.record(&delta);
            }
            if self.config.metrics_enabled {
                self.pipeline.enqueue(delta);
            }
        }
        if self.config.traces_enabled {
            for record in records {
                self.pipeline.enqueue(record);
            }
        }
    }

    fn emit_logs(&self, logs: Vec<LogRecord>) {
        if self.config.logs_enabled {
            for log in logs {
                self.pipeline.enqueue(log);
            }
        }
    }

    fn take_warnings(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .warnings
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn active_session(inner: &mut Inner) -> Option<&mut SessionContext> {
    if inner.state != SessionState::Active {
        return None;
    }
    inner.session.as_mut()
}

/// Strings are recorded as-is, other JSON values in compact form
fn render_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn session_span_name(prompt: &Sanitized, policy: &RedactionPolicy) -> Sanitized {
    let preview: String = prompt.as_str().chars().take(PROMPT_PREVIEW_CHARS).collect();
    if preview.is_empty() {
        Sanitized::from_static("agent.session")
    } else if prompt.char_len() > PROMPT_PREVIEW_CHARS {
        policy.sanitize(&format!("agent.session: {preview}..."))
    } else {
        policy.sanitize(&format!("agent.session: {preview}"))
    }
}

fn orphan_record(
    pending: PendingTool,
    now: chrono::DateTime<Utc>,
    policy: &RedactionPolicy,
) -> SpanRecord {
    let mut record = pending.record;
    record.finish(
        now,
        SpanStatus::Error(Sanitized::from_static("tool end never reported")),
    );
    let duration_ms = record.duration_ms();
    record
        .attributes
        .text("tool.status", "orphaned", policy)
        .float("tool.duration_ms", duration_ms);
    record
}

#[cfg(test)]
mod tests;
