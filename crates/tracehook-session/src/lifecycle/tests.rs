use super::*;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracehook_core::MemoryTransport;

fn config() -> TelemetryConfig {
    TelemetryConfig {
        shutdown_timeout_ms: 2_000,
        ..Default::default()
    }
}

fn manager_with(config: TelemetryConfig) -> (SessionManager, MemoryTransport, Metrics) {
    let transport = MemoryTransport::new();
    let metrics = Metrics::new().unwrap();
    let pipeline = Arc::new(ExportPipeline::start(
        Arc::new(transport.clone()),
        config.export,
        Some(metrics.clone()),
    ));
    let manager = SessionManager::new(
        config,
        Arc::new(RedactionPolicy::defaults()),
        pipeline,
        Some(metrics.clone()),
    );
    (manager, transport, metrics)
}

fn manager() -> (SessionManager, MemoryTransport) {
    let (manager, transport, _) = manager_with(config());
    (manager, transport)
}

fn prompt(text: &str) -> PromptSubmit {
    PromptSubmit {
        session_id: Some("s-1".to_string()),
        prompt: text.to_string(),
        model: Some("claude-test".to_string()),
    }
}

fn tool_start(name: &str, id: Option<&str>, input: Value) -> ToolStart {
    ToolStart {
        session_id: Some("s-1".to_string()),
        tool_name: name.to_string(),
        tool_use_id: id.map(str::to_string),
        tool_input: input,
    }
}

fn tool_end(name: &str, id: Option<&str>, response: Option<Value>) -> ToolEnd {
    ToolEnd {
        session_id: Some("s-1".to_string()),
        tool_name: name.to_string(),
        tool_use_id: id.map(str::to_string),
        tool_input: Value::Null,
        tool_response: response,
    }
}

fn spans_of(transport: &MemoryTransport, kind: SpanKind) -> Vec<SpanRecord> {
    transport
        .spans()
        .into_iter()
        .filter(|span| span.kind == kind)
        .collect()
}

fn transcript_file(value: Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{value}").unwrap();
    file
}

#[tokio::test]
async fn test_start_twice_is_caller_error() {
    let (manager, _) = manager();
    let id = manager.start(Some("abc"), None).unwrap();
    assert_eq!(id, "abc");
    assert_eq!(manager.state(), SessionState::Active);

    let err = manager.start(Some("other"), None).unwrap_err();
    assert!(matches!(err, Error::DoubleSessionStart(ref existing) if existing == "abc"));
    assert!(err.is_caller_error());
}

#[tokio::test]
async fn test_stop_without_start_is_caller_error() {
    let (manager, _) = manager();
    let err = manager.stop(None).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotStarted));
}

#[tokio::test]
async fn test_missing_session_id_is_generated() {
    let (manager, _) = manager();
    let id = manager.start(None, None).unwrap();
    assert_eq!(id.len(), 32);
    assert_eq!(manager.session_id(), Some(id));
}

#[tokio::test]
async fn test_full_session_records() {
    let (manager, transport) = manager();

    manager.prompt_submit(&prompt("list the files")).unwrap();
    manager
        .tool_start(&tool_start("Bash", Some("tu_1"), json!({"command": "ls"})))
        .unwrap();
    manager
        .tool_end(&tool_end("Bash", Some("tu_1"), Some(json!("a.txt\nb.txt"))))
        .unwrap();
    manager.turn_end(Some(TokenCounts::new(100, 50).with_cache(20, 0)), Some("claude-resp"));

    let report = manager.stop(None).await.unwrap();
    assert_eq!(report.status, SessionStatus::Ok);
    assert_eq!(report.turns, 1);
    assert_eq!(report.tools_used, 1);
    assert_eq!(report.orphaned_tools, 0);
    assert_eq!(report.totals, TokenCounts::new(100, 50).with_cache(20, 0));
    assert_eq!(report.usage_source, Some(UsageSource::RealTime));
    assert_eq!(manager.state(), SessionState::Closed);

    let session = spans_of(&transport, SpanKind::Session).remove(0);
    let turn = spans_of(&transport, SpanKind::Turn).remove(0);
    let tool = spans_of(&transport, SpanKind::Tool).remove(0);

    // Hierarchy: session -> turn -> tool
    assert_eq!(turn.parent_span_id, Some(session.span_id));
    assert_eq!(tool.parent_span_id, Some(turn.span_id));
    assert_eq!(tool.trace_id, session.trace_id);

    assert_eq!(session.name, "agent.session: list the files");
    assert_eq!(session.attributes.get_text("session.id"), Some("s-1"));
    assert_eq!(session.attributes.get_text("gen_ai.request.model"), Some("claude-test"));
    assert_eq!(session.attributes.get_text("gen_ai.response.model"), Some("claude-resp"));
    assert_eq!(session.attributes.get_int("gen_ai.usage.input_tokens"), Some(100));
    assert_eq!(session.attributes.get_int("tokens.cache_read"), Some(20));
    assert_eq!(session.attributes.get_text("tool_names"), Some("Bash"));
    assert_eq!(session.attributes.get_text("session.status"), Some("ok"));
    assert_eq!(session.attributes.get_text("tokens.source"), Some("real_time"));
    assert_eq!(session.status, SpanStatus::Ok);
    let events: Vec<_> = session.events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        events,
        vec!["user.prompt.submitted", "turn.completed", "session.completed"]
    );

    assert_eq!(turn.attributes.get_int("turn.index"), Some(1));
    assert_eq!(turn.attributes.get_int("turn.tool_count"), Some(1));
    assert_eq!(turn.attributes.get_text("turn.tool_ids"), Some("tu_1"));
    assert_eq!(turn.attributes.get_int("gen_ai.usage.output_tokens"), Some(50));

    assert_eq!(tool.name, "tool.Bash");
    assert_eq!(tool.attributes.get_text("tool.status"), Some("success"));
    assert_eq!(tool.attributes.get_text("tool.input"), Some(r#"{"command":"ls"}"#));
    assert_eq!(tool.attributes.get_int("tool.response_bytes"), Some(11));
    assert_eq!(tool.attributes.get_text("gen_ai.operation.name"), Some("execute_tool"));
    assert!(tool.end_time >= tool.start_time);
    assert_eq!(tool.events.len(), 2);
}

#[tokio::test]
async fn test_tool_error_status() {
    let (manager, transport) = manager();
    manager.start(Some("s"), None).unwrap();
    manager
        .tool_start(&tool_start("Read", Some("tu_1"), json!({"file": "/missing"})))
        .unwrap();
    manager
        .tool_end(&tool_end(
            "Read",
            Some("tu_1"),
            Some(json!({"error": "No such file"})),
        ))
        .unwrap();
    manager.stop(None).await.unwrap();

    let tool = spans_of(&transport, SpanKind::Tool).remove(0);
    assert_eq!(tool.attributes.get_text("tool.status"), Some("error"));
    assert_eq!(tool.attributes.get_text("tool.error"), Some("No such file"));
    assert!(tool.status.is_error());
    // Tool started outside a turn hangs off the session
    let session = spans_of(&transport, SpanKind::Session).remove(0);
    assert_eq!(tool.parent_span_id, Some(session.span_id));
}

#[tokio::test]
async fn test_secrets_redacted_before_export() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("use key AKIAABCDEFTESTKEY1234")).unwrap();
    let input = json!({"command": "export AWS=AKIAABCDEFTESTKEY1234"});
    let raw_len = input.to_string().len() as i64;
    manager
        .tool_start(&tool_start("Bash", Some("tu_1"), input))
        .unwrap();
    manager
        .tool_end(&tool_end("Bash", Some("tu_1"), Some(json!("AKIAZZZZZZZZZZZZ5678"))))
        .unwrap();
    manager.stop(None).await.unwrap();

    let serialized = serde_json::to_string(&transport.items()).unwrap();
    assert!(!serialized.contains("AKIAABCDEFTESTKEY1234"));
    assert!(!serialized.contains("AKIAZZZZZZZZZZZZ5678"));
    assert!(serialized.contains("[REDACTED]"));

    let tool = spans_of(&transport, SpanKind::Tool).remove(0);
    // Byte sizes reflect the payload before redaction
    assert_eq!(tool.attributes.get_int("tool.input_bytes"), Some(raw_len));
    assert_eq!(tool.attributes.get_int("tool.response_bytes"), Some(20));
}

#[tokio::test]
async fn test_orphaned_tool_closed_at_stop() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("go")).unwrap();
    manager
        .tool_start(&tool_start("Task", Some("tu_9"), json!({})))
        .unwrap();
    assert_eq!(manager.open_tools(), 1);

    let report = manager.stop(None).await.unwrap();
    assert_eq!(report.orphaned_tools, 1);
    assert_eq!(manager.open_tools(), 0);

    let tool = spans_of(&transport, SpanKind::Tool).remove(0);
    assert_eq!(tool.attributes.get_text("tool.status"), Some("orphaned"));
    assert!(tool.end_time >= tool.start_time);

    // A late end hook finds nothing to close
    manager
        .tool_end(&tool_end("Task", Some("tu_9"), None))
        .unwrap();
    assert_eq!(spans_of(&transport, SpanKind::Tool).len(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("hi")).unwrap();

    let first = manager.stop(None).await.unwrap();
    let second = manager.stop(None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.flush_count(), 1);
    assert_eq!(spans_of(&transport, SpanKind::Session).len(), 1);

    let shutdown = manager.shutdown(SessionStatus::Error).await.unwrap();
    assert_eq!(shutdown.status, SessionStatus::Ok);
    assert!(manager.start(None, None).is_err());
}

#[tokio::test]
async fn test_shutdown_without_session_drains_pipeline() {
    let (manager, transport) = manager();
    assert!(manager.shutdown(SessionStatus::Ok).await.is_none());
    assert!(manager.pipeline().is_shut_down());
    assert_eq!(transport.flush_count(), 1);
}

#[tokio::test]
async fn test_forced_shutdown_status() {
    let (manager, transport) = manager();
    manager.start(Some("s"), None).unwrap();
    let report = manager.shutdown(SessionStatus::Error).await.unwrap();
    assert_eq!(report.status, SessionStatus::Error);

    let session = spans_of(&transport, SpanKind::Session).remove(0);
    assert_eq!(session.attributes.get_text("session.status"), Some("error"));
    assert!(session.status.is_error());
}

#[tokio::test]
async fn test_interrupt_once_cancels_turn() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("long task")).unwrap();

    assert_eq!(manager.interrupt().await, InterruptOutcome::TurnCancelled);
    assert_eq!(manager.state(), SessionState::Active);

    // Hooks against the cancelled turn are no-ops
    manager
        .tool_start(&tool_start("Bash", Some("tu_1"), json!({})))
        .unwrap();
    assert_eq!(manager.open_tools(), 0);
    manager.turn_end(Some(TokenCounts::new(10, 10)), None);

    let report = manager.stop(None).await.unwrap();
    assert!(report.totals.is_zero());
    let turn = spans_of(&transport, SpanKind::Turn).remove(0);
    assert_eq!(
        turn.attributes
            .get("turn.cancelled")
            .and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[tokio::test]
async fn test_interrupt_twice_closes_session() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("long task")).unwrap();

    assert_eq!(manager.interrupt().await, InterruptOutcome::TurnCancelled);
    let InterruptOutcome::SessionClosed(report) = manager.interrupt().await else {
        panic!("second interrupt should close the session");
    };
    assert_eq!(report.status, SessionStatus::Interrupted);
    assert_eq!(manager.state(), SessionState::Closed);
    assert_eq!(manager.interrupt().await, InterruptOutcome::Ignored);

    let session = spans_of(&transport, SpanKind::Session).remove(0);
    assert_eq!(session.attributes.get_text("session.status"), Some("interrupted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_racing_stop_closes_once() {
    let (manager, transport) = manager();
    let manager = Arc::new(manager);
    manager.prompt_submit(&prompt("race")).unwrap();
    assert_eq!(manager.interrupt().await, InterruptOutcome::TurnCancelled);

    let interrupt = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.interrupt().await })
    };
    let stopped = manager.stop(None).await.unwrap();

    match interrupt.await.unwrap() {
        InterruptOutcome::SessionClosed(report) => assert_eq!(report, stopped),
        InterruptOutcome::Ignored => {}
        InterruptOutcome::TurnCancelled => panic!("second interrupt inside the window"),
    }
    assert_eq!(manager.state(), SessionState::Closed);
    assert_eq!(spans_of(&transport, SpanKind::Session).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_outside_window_only_cancels() {
    let (manager, _) = manager();
    manager.prompt_submit(&prompt("task")).unwrap();

    assert_eq!(manager.interrupt().await, InterruptOutcome::TurnCancelled);
    tokio::time::advance(Duration::from_millis(2_500)).await;
    assert_eq!(manager.interrupt().await, InterruptOutcome::TurnCancelled);
    assert_eq!(manager.state(), SessionState::Active);
}

#[tokio::test]
async fn test_reconciliation_from_transcript() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("hi")).unwrap();
    manager.turn_end(None, None);

    let file = transcript_file(json!({
        "messages": [
            {"role": "user", "content": "hi"},
            {"role": "assistant", "usage": {"input_tokens": 100, "output_tokens": 50}},
            {"role": "assistant", "usage": {"input_tokens": 150, "output_tokens": 75,
                "cache_read_input_tokens": 100, "cache_creation_input_tokens": 50}}
        ]
    }));

    let report = manager.stop(Some(file.path())).await.unwrap();
    assert_eq!(report.totals, TokenCounts::new(250, 125).with_cache(100, 50));
    assert_eq!(report.usage_source, Some(UsageSource::Reconciled));

    let session = spans_of(&transport, SpanKind::Session).remove(0);
    assert_eq!(session.attributes.get_int("gen_ai.usage.input_tokens"), Some(250));
    assert_eq!(session.attributes.get_text("tokens.source"), Some("reconciled"));
}

#[tokio::test]
async fn test_stale_reconciliation_keeps_real_time_totals() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("one")).unwrap();
    manager.turn_end(Some(TokenCounts::new(100, 50)), None);
    manager.prompt_submit(&prompt("two")).unwrap();
    manager.turn_end(Some(TokenCounts::new(30, 20)), None);

    let file = transcript_file(json!([
        {"role": "assistant", "usage": {"input_tokens": 180, "output_tokens": 70}}
    ]));
    let report = manager.stop(Some(file.path())).await.unwrap();
    assert_eq!(report.totals, TokenCounts::new(130, 70));

    let session = spans_of(&transport, SpanKind::Session).remove(0);
    assert_eq!(session.attributes.get_int("gen_ai.usage.input_tokens"), Some(130));
    assert_eq!(session.attributes.get_int("tokens.reconciled.input"), Some(180));
    assert_eq!(session.attributes.get_int("turns"), Some(2));
}

#[tokio::test]
async fn test_missing_transcript_is_a_warning() {
    let (manager, _) = manager();
    manager.prompt_submit(&prompt("hi")).unwrap();

    let report = manager
        .stop(Some(Path::new("/nonexistent/transcript.jsonl")))
        .await
        .unwrap();
    assert_eq!(report.status, SessionStatus::Ok);
    assert!(report.totals.is_zero());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("Transcript unavailable"));
}

#[tokio::test]
async fn test_compaction_record() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("hi")).unwrap();
    manager
        .compaction(&Compaction {
            session_id: None,
            trigger: "auto".to_string(),
            custom_instructions: Some("keep tests".to_string()),
        })
        .unwrap();
    manager.stop(None).await.unwrap();

    let event = spans_of(&transport, SpanKind::Event).remove(0);
    assert_eq!(event.name, "context.compaction");
    assert_eq!(event.attributes.get_text("compaction.trigger"), Some("auto"));
    assert_eq!(
        event
            .attributes
            .get("compaction.has_custom_instructions")
            .and_then(|v| v.as_bool()),
        Some(true)
    );
    let session = spans_of(&transport, SpanKind::Session).remove(0);
    assert!(session.events.iter().any(|e| e.name == "context.compaction"));
}

#[tokio::test]
async fn test_metrics_recorded_and_exported_when_enabled() {
    let (manager, transport, metrics) = manager_with(TelemetryConfig {
        metrics_enabled: true,
        ..config()
    });
    manager.prompt_submit(&prompt("one")).unwrap();
    manager.turn_end(Some(TokenCounts::new(10, 5).with_cache(3, 0)), None);
    manager.prompt_submit(&prompt("two")).unwrap();
    manager.turn_end(Some(TokenCounts::new(10, 5)), None);
    manager.stop(None).await.unwrap();

    let text = metrics.render().unwrap();
    assert!(text.contains("tracehook_cache_hits_total{model=\"claude-test\"} 1"));
    assert!(text.contains("tracehook_cache_misses_total{model=\"claude-test\"} 1"));
    assert!(text.contains("tracehook_turns_total{model=\"claude-test\"} 2"));
    assert!(text.contains("tracehook_model_requests_total{model=\"claude-test\"} 2"));
    assert!(text.contains("tracehook_sessions_in_flight 0"));

    let exported = transport.metrics();
    assert!(exported.iter().any(|m| matches!(m, MetricDelta::PromptLatency { .. })));
    assert!(exported.iter().any(|m| matches!(m, MetricDelta::Turn { .. })));
}

#[tokio::test]
async fn test_metric_deltas_not_exported_when_disabled() {
    let (manager, transport, metrics) = manager_with(config());
    manager.prompt_submit(&prompt("one")).unwrap();
    manager.turn_end(Some(TokenCounts::new(10, 5)), None);
    manager.stop(None).await.unwrap();

    assert!(transport.metrics().is_empty());
    // The recorder still counts
    assert!(metrics.render().unwrap().contains("tracehook_turns_total"));
}

#[tokio::test]
async fn test_concurrent_tool_hooks() {
    let (manager, transport) = manager();
    let manager = Arc::new(manager);
    manager.prompt_submit(&prompt("parallel")).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let id = format!("tu_{i}");
                manager
                    .tool_start(&tool_start("Read", Some(&id), json!({"i": i})))
                    .unwrap();
                tokio::task::yield_now().await;
                manager
                    .tool_end(&tool_end("Read", Some(&id), Some(json!("ok"))))
                    .unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    manager.turn_end(None, None);

    let report = manager.stop(None).await.unwrap();
    assert_eq!(report.tools_used, 16);
    assert_eq!(report.orphaned_tools, 0);

    let tools = spans_of(&transport, SpanKind::Tool);
    assert_eq!(tools.len(), 16);
    assert!(tools.iter().all(|t| t.end_time >= t.start_time));
    let turn = spans_of(&transport, SpanKind::Turn).remove(0);
    assert_eq!(turn.attributes.get_int("turn.tool_count"), Some(16));
}

#[tokio::test]
async fn test_traces_disabled_exports_no_spans() {
    let (manager, transport, _) = manager_with(TelemetryConfig {
        traces_enabled: false,
        ..config()
    });
    manager.prompt_submit(&prompt("hi")).unwrap();
    manager.stop(None).await.unwrap();
    assert!(transport.spans().is_empty());
}

#[tokio::test]
async fn test_from_config_reports_invalid_patterns() {
    let transport = MemoryTransport::new();
    let manager = SessionManager::from_config(config(), Arc::new(transport), |key| match key {
        "TRACEHOOK_REDACT_PATTERNS" => Some("([unclosed,ok_[0-9]+".to_string()),
        _ => None,
    });
    manager.start(Some("s"), None).unwrap();
    let report = manager.stop(None).await.unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("Redaction policy invalid"));
    assert!(manager.policy().pattern_count() > 0);
}

#[test]
fn test_session_span_name_preview() {
    let long = "word ".repeat(16);
    let policy = RedactionPolicy::defaults();
    let name = session_span_name(&policy.sanitize(&long), &policy);
    assert!(name.as_str().ends_with("..."));
    assert_eq!(name.as_str().len(), "agent.session: ".len() + 60 + 3);
    assert_eq!(session_span_name(&policy.sanitize(""), &policy), "agent.session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tool_start_racing_close_is_never_lost() {
    for round in 0..200 {
        let (manager, transport) = manager();
        let manager = Arc::new(manager);
        manager.prompt_submit(&prompt("race")).unwrap();

        let starts: Vec<_> = (0..16)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let id = format!("tu_{i}");
                    manager
                        .tool_start(&tool_start("Bash", Some(&id), json!({"i": i})))
                        .unwrap();
                })
            })
            .collect();
        let report = manager.stop(None).await.unwrap();
        for task in starts {
            task.await.unwrap();
        }

        assert_eq!(manager.open_tools(), 0, "round {round}");
        assert_eq!(report.orphaned_tools as u64, report.tools_used, "round {round}");
        let tools = spans_of(&transport, SpanKind::Tool);
        assert_eq!(tools.len() as u64, report.tools_used, "round {round}");
    }
}

#[tokio::test]
async fn test_tool_name_bounded_in_span_name_and_labels() {
    let (manager, transport, metrics) = manager_with(TelemetryConfig {
        metrics_enabled: true,
        ..config()
    });
    let limit = manager.policy().limits().max_attr_length;
    let secret = format!("password=hunter2{}", "x".repeat(5000));
    let long = "y".repeat(5000);

    manager.prompt_submit(&prompt("go")).unwrap();
    for (name, id) in [(&secret, "t1"), (&long, "t2")] {
        manager.tool_start(&tool_start(name, Some(id), json!({}))).unwrap();
        manager.tool_end(&tool_end(name, Some(id), None)).unwrap();
    }
    manager.stop(None).await.unwrap();

    let tools = spans_of(&transport, SpanKind::Tool);
    assert_eq!(tools.len(), 2);
    for tool in &tools {
        assert!(!tool.name.as_str().contains("hunter2"));
        assert!(tool.name.char_len() <= limit);
        assert!(tool.name.as_str().starts_with("tool."));
    }

    let labels: Vec<Sanitized> = transport
        .metrics()
        .into_iter()
        .filter_map(|m| match m {
            MetricDelta::ToolCall { tool_name, .. } => Some(tool_name),
            _ => None,
        })
        .collect();
    assert_eq!(labels.len(), 2);
    assert!(labels.iter().all(|l| !l.as_str().contains("hunter2")));
    assert!(labels.iter().all(|l| l.char_len() <= limit));
    assert!(labels[1].was_truncated());

    let rendered = metrics.render().unwrap();
    assert!(!rendered.contains("hunter2"));
    assert!(!rendered.contains(&long));
}

#[tokio::test]
async fn test_session_id_trigger_and_model_are_sanitized() {
    let (manager, transport, _) = manager_with(TelemetryConfig {
        metrics_enabled: true,
        ..config()
    });
    let limit = manager.policy().limits().max_attr_length;
    let long_id = "s".repeat(1000);

    manager
        .start(Some(&long_id), Some("token=abc123 model"))
        .unwrap();
    manager
        .compaction(&Compaction {
            session_id: None,
            trigger: "secret=letmein".to_string(),
            custom_instructions: None,
        })
        .unwrap();
    let report = manager.stop(None).await.unwrap();
    assert!(report.session_id.chars().count() <= limit);

    let spans = transport.spans();
    assert!(!spans.is_empty());
    for span in &spans {
        assert!(span.session_id.char_len() <= limit);
        assert_eq!(span.session_id.as_str(), report.session_id);
    }

    let Some(MetricDelta::Compaction { trigger, model }) = transport
        .metrics()
        .into_iter()
        .find(|m| matches!(m, MetricDelta::Compaction { .. }))
    else {
        panic!("compaction delta exported");
    };
    assert!(!trigger.as_str().contains("letmein"));
    assert!(!model.as_str().contains("abc123"));
}

#[tokio::test]
async fn test_tool_log_records_follow_spans() {
    let (manager, transport) = manager();
    manager.prompt_submit(&prompt("logs")).unwrap();
    manager
        .tool_start(&tool_start("Bash", Some("t1"), json!({"command": "ls"})))
        .unwrap();
    manager
        .tool_end(&tool_end("Bash", Some("t1"), Some(json!("ok"))))
        .unwrap();
    manager
        .tool_start(&tool_start("Read", Some("t2"), json!({"path": "a.rs"})))
        .unwrap();
    manager.stop(None).await.unwrap();

    let logs = transport.logs();
    assert_eq!(logs.len(), 2);
    let tools = spans_of(&transport, SpanKind::Tool);

    let bash_span = tools.iter().find(|t| t.name == "tool.Bash").unwrap();
    let bash = logs
        .iter()
        .find(|l| l.span_id == Some(bash_span.span_id))
        .unwrap();
    assert_eq!(bash.severity, LogSeverity::Info);
    assert_eq!(bash.body, "Tool Bash success");
    assert_eq!(bash.trace_id, bash_span.trace_id);
    assert_eq!(bash.session_id, "s-1");
    assert_eq!(bash.attributes.get_text("tool.use_id"), Some("t1"));

    let orphan = logs
        .iter()
        .find(|l| l.severity == LogSeverity::Warn)
        .unwrap();
    assert_eq!(orphan.attributes.get_text("tool.name"), Some("Read"));
    assert_eq!(orphan.attributes.get_text("tool.status"), Some("orphaned"));
}

#[tokio::test]
async fn test_tool_logs_not_exported_when_disabled() {
    let (manager, transport, _) = manager_with(TelemetryConfig {
        logs_enabled: false,
        ..config()
    });
    manager.prompt_submit(&prompt("quiet")).unwrap();
    manager.tool_start(&tool_start("Bash", Some("t"), json!({}))).unwrap();
    manager.tool_end(&tool_end("Bash", Some("t"), None)).unwrap();
    manager.stop(None).await.unwrap();

    assert!(transport.logs().is_empty());
    assert_eq!(spans_of(&transport, SpanKind::Tool).len(), 1);
}
