//! End-to-end session tests
//!
//! These tests drive a `SessionManager` through raw hook payloads and verify:
//! 1. Real-time token usage is not overridden by a stale transcript total
//! 2. Sessions without real-time usage fall back to the transcript
//! 3. Tools still open at close are exported as orphans
//! 4. Stop is idempotent and late hooks are ignored
//! 5. Allowlisted text survives redaction end to end
//! 6. A double interrupt closes the session as interrupted

use serde_json::{Value, json};
use std::time::Duration;
use tracehook_core::{SpanKind, SpanRecord, SpanStatus, TokenCounts, UsageSource};
use tracehook_integration_tests::{manager_with_env, memory_manager, test_config, write_transcript};
use tracehook_session::{
    HookDecision, InterruptOutcome, SessionManager, SessionState, SessionStatus, TokenAggregator,
    dispatch, parse_transcript,
};

async fn send(manager: &SessionManager, name: &str, payload: Value) {
    let decision = dispatch(manager, name, &payload).await.unwrap();
    assert_eq!(decision, HookDecision::Allow);
}

fn session_span(spans: &[SpanRecord]) -> &SpanRecord {
    let mut sessions = spans.iter().filter(|s| s.kind == SpanKind::Session);
    let session = sessions.next().expect("session span exported");
    assert!(sessions.next().is_none(), "session span exported twice");
    session
}

#[tokio::test]
async fn test_real_time_usage_survives_stale_reconciliation() {
    let (manager, transport) = memory_manager(test_config());
    let transcript = write_transcript(&[(100, 50), (80, 20)]).unwrap();

    send(&manager, "UserPromptSubmit", json!({"session_id": "rt", "prompt": "one"})).await;
    send(
        &manager,
        "MessageComplete",
        json!({"usage": {"input_tokens": 100, "output_tokens": 50}}),
    )
    .await;
    send(&manager, "UserPromptSubmit", json!({"session_id": "rt", "prompt": "two"})).await;
    send(
        &manager,
        "MessageComplete",
        json!({"usage": {"input_tokens": 30, "output_tokens": 20}}),
    )
    .await;

    let report = manager.stop(Some(transcript.path())).await.unwrap();
    assert_eq!(report.totals, TokenCounts::new(130, 70));
    assert_eq!(report.usage_source, Some(UsageSource::RealTime));
    assert_eq!(report.turns, 2);

    let spans = transport.spans();
    let session = session_span(&spans);
    assert_eq!(session.attributes.get_int("gen_ai.usage.input_tokens"), Some(130));
    assert_eq!(session.attributes.get_int("gen_ai.usage.output_tokens"), Some(70));
    assert_eq!(session.attributes.get_int("tokens.reconciled.input"), Some(180));
    assert_eq!(session.attributes.get_int("tokens.reconciled.output"), Some(70));
    assert_eq!(session.attributes.get_text("tokens.source"), Some("real_time"));
}

#[tokio::test]
async fn test_transcript_fills_missing_real_time_usage() {
    let (manager, transport) = memory_manager(test_config());
    let transcript = write_transcript(&[(100, 50), (80, 20)]).unwrap();

    send(&manager, "UserPromptSubmit", json!({"session_id": "rc", "prompt": "hi"})).await;
    send(&manager, "MessageComplete", json!({})).await;
    send(
        &manager,
        "Stop",
        json!({"session_id": "rc", "transcript_path": transcript.path()}),
    )
    .await;

    assert_eq!(manager.state(), SessionState::Closed);
    let spans = transport.spans();
    let session = session_span(&spans);
    assert_eq!(session.attributes.get_int("gen_ai.usage.input_tokens"), Some(180));
    assert_eq!(session.attributes.get_int("gen_ai.usage.output_tokens"), Some(70));
    assert_eq!(session.attributes.get_text("tokens.source"), Some("reconciled"));
    assert_eq!(
        session.attributes.get_text("gen_ai.response.model"),
        Some("claude-test")
    );
}

#[tokio::test]
async fn test_reconciling_the_same_transcript_twice_adds_nothing() {
    let transcript = write_transcript(&[(10, 5), (20, 7), (30, 9)]).unwrap();
    let text = tokio::fs::read_to_string(transcript.path()).await.unwrap();
    let usage = parse_transcript(&text).unwrap();

    let mut aggregator = TokenAggregator::new();
    let first = aggregator.reconcile(usage.entries.clone());
    let second = aggregator.reconcile(usage.entries.clone());

    assert_eq!(first.accepted, 3);
    assert_eq!(second.accepted, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(aggregator.totals(), TokenCounts::new(60, 21));
}

#[tokio::test]
async fn test_open_tool_exported_as_orphan() {
    let (manager, transport) = memory_manager(test_config());

    send(&manager, "UserPromptSubmit", json!({"session_id": "o", "prompt": "go"})).await;
    send(
        &manager,
        "PreToolUse",
        json!({"tool_name": "Bash", "tool_use_id": "t-1", "tool_input": {"command": "sleep 100"}}),
    )
    .await;
    let report = manager.stop(None).await.unwrap();
    assert_eq!(report.orphaned_tools, 1);

    // The end hook for the orphaned tool arrives after close
    send(
        &manager,
        "PostToolUse",
        json!({"tool_name": "Bash", "tool_use_id": "t-1", "tool_response": "done"}),
    )
    .await;

    let tools: Vec<SpanRecord> = transport
        .spans()
        .into_iter()
        .filter(|s| s.kind == SpanKind::Tool)
        .collect();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].attributes.get_text("tool.status"), Some("orphaned"));
    assert!(matches!(tools[0].status, SpanStatus::Error(_)));
}

#[tokio::test]
async fn test_stop_twice_exports_once() {
    let (manager, transport) = memory_manager(test_config());

    send(&manager, "SessionStart", json!({"session_id": "twice"})).await;
    send(&manager, "UserPromptSubmit", json!({"prompt": "hello"})).await;

    let first = manager.stop(None).await.unwrap();
    send(&manager, "Stop", json!({"session_id": "twice"})).await;
    let second = manager.stop(None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.session_id, "twice");
    session_span(&transport.spans());
    assert_eq!(transport.flush_count(), 1);
}

#[tokio::test]
async fn test_allowlisted_token_survives_export() {
    let transport = tracehook_core::MemoryTransport::new();
    let manager = manager_with_env(
        test_config(),
        std::sync::Arc::new(transport.clone()),
        &[("TRACEHOOK_REDACT_ALLOWLIST", "test_.*")],
    );

    send(
        &manager,
        "UserPromptSubmit",
        json!({
            "session_id": "allow",
            "prompt": "key=AKIAABCDEFTESTKEY1234 test_AKIAZZZZZZZZZZZZ5678"
        }),
    )
    .await;
    manager.stop(None).await.unwrap();

    let spans = transport.spans();
    let session = session_span(&spans);
    assert_eq!(
        session.attributes.get_text("prompt"),
        Some("key=[REDACTED]4 test_AKIAZZZZZZZZZZZZ5678")
    );

    let exported = serde_json::to_string(&spans).unwrap();
    assert!(!exported.contains("AKIAABCDEFTESTKEY123"));
}

#[tokio::test(start_paused = true)]
async fn test_double_interrupt_closes_session() {
    let (manager, transport) = memory_manager(test_config());

    send(&manager, "UserPromptSubmit", json!({"session_id": "int", "prompt": "long task"})).await;
    assert_eq!(manager.interrupt().await, InterruptOutcome::TurnCancelled);

    tokio::time::advance(Duration::from_millis(500)).await;
    let InterruptOutcome::SessionClosed(report) = manager.interrupt().await else {
        panic!("second interrupt should close the session");
    };
    assert_eq!(report.status, SessionStatus::Interrupted);
    assert_eq!(manager.interrupt().await, InterruptOutcome::Ignored);

    let spans = transport.spans();
    let session = session_span(&spans);
    assert_eq!(session.status, SpanStatus::Unset);
    assert_eq!(
        session.attributes.get_text("session.status"),
        Some("interrupted")
    );
}
