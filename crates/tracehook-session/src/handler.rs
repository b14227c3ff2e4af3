//! Hook dispatch
//!
//! Each hook name maps to one `HookEvent` variant, and handlers match on the
//! variants exhaustively. Handlers only observe: every hook is allowed to
//! proceed. Malformed payloads are skipped; the only errors returned are
//! caller contract violations.

use crate::lifecycle::{SessionManager, SessionStatus};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracehook_core::{HookEvent, Result};

/// Decision returned to the agent for a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookDecision {
    Allow,
}

#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, event: HookEvent) -> Result<HookDecision>;
}

/// Parse a raw hook and hand it to `handler`.
///
/// A payload that fails to parse is logged at debug level and allowed.
pub async fn dispatch<H>(handler: &H, name: &str, payload: &Value) -> Result<HookDecision>
where
    H: HookHandler + ?Sized,
{
    match HookEvent::parse(name, payload) {
        Ok(event) => handler.handle(event).await,
        Err(e) => {
            tracing::debug!(hook = name, error = %e, "Skipping malformed hook");
            Ok(HookDecision::Allow)
        }
    }
}

#[async_trait]
impl HookHandler for SessionManager {
    async fn handle(&self, event: HookEvent) -> Result<HookDecision> {
        let hook = event.name();
        let result = match event {
            HookEvent::SessionStart(e) => self
                .start(e.session_id.as_deref(), e.model.as_deref())
                .map(|_| ()),
            HookEvent::UserPromptSubmit(e) => self.prompt_submit(&e),
            HookEvent::PreToolUse(e) => self.tool_start(&e),
            HookEvent::PostToolUse(e) => self.tool_end(&e),
            HookEvent::TurnComplete(e) => {
                self.turn_end(e.usage, e.model.as_deref());
                Ok(())
            }
            HookEvent::PreCompact(e) => self.compaction(&e),
            HookEvent::Stop(e) => self.stop(e.transcript_path.as_deref()).await.map(|_| ()),
            HookEvent::Interrupt(_) => {
                self.interrupt().await;
                Ok(())
            }
        };

        match result {
            Ok(()) => Ok(HookDecision::Allow),
            Err(e) if e.is_caller_error() => Err(e),
            Err(e) => {
                tracing::debug!(hook, error = %e, "Hook handling failed");
                Ok(HookDecision::Allow)
            }
        }
    }
}

impl SessionManager {
    /// Close at process exit with a status derived from the agent's exit
    pub async fn finish_run(&self, agent_succeeded: bool) {
        let status = if agent_succeeded {
            SessionStatus::Ok
        } else {
            SessionStatus::Error
        };
        if let Some(report) = self.shutdown(status).await
            && !report.warnings.is_empty()
        {
            tracing::warn!(warnings = ?report.warnings, "Telemetry finished with warnings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportPipeline;
    use serde_json::json;
    use std::sync::Arc;
    use tracehook_core::{Error, MemoryTransport, SpanKind, TelemetryConfig};
    use tracehook_pii::RedactionPolicy;

    fn manager() -> (SessionManager, MemoryTransport) {
        let transport = MemoryTransport::new();
        let config = TelemetryConfig::default();
        let pipeline = Arc::new(ExportPipeline::start(
            Arc::new(transport.clone()),
            config.export,
            None,
        ));
        let manager =
            SessionManager::new(config, Arc::new(RedactionPolicy::defaults()), pipeline, None);
        (manager, transport)
    }

    #[tokio::test]
    async fn test_dispatch_full_flow() {
        let (manager, transport) = manager();
        let hooks = [
            ("UserPromptSubmit", json!({"session_id": "s-9", "prompt": "hello"})),
            (
                "PreToolUse",
                json!({"tool_name": "Bash", "tool_use_id": "t1", "tool_input": {"command": "ls"}}),
            ),
            (
                "PostToolUse",
                json!({"tool_name": "Bash", "tool_use_id": "t1", "tool_response": "ok"}),
            ),
            (
                "MessageComplete",
                json!({"usage": {"input_tokens": 5, "output_tokens": 2}}),
            ),
            ("Stop", json!({"session_id": "s-9"})),
        ];
        for (name, payload) in hooks {
            assert_eq!(
                dispatch(&manager, name, &payload).await.unwrap(),
                HookDecision::Allow
            );
        }

        assert_eq!(manager.session_id(), None);
        let spans = transport.spans();
        assert_eq!(spans.iter().filter(|s| s.kind == SpanKind::Tool).count(), 1);
        let session = spans.iter().find(|s| s.kind == SpanKind::Session).unwrap();
        assert_eq!(session.session_id, "s-9");
        assert_eq!(session.attributes.get_int("gen_ai.usage.input_tokens"), Some(5));
    }

    #[tokio::test]
    async fn test_malformed_hook_is_allowed() {
        let (manager, _) = manager();
        let decision = dispatch(&manager, "PreToolUse", &json!({"tool_input": {}}))
            .await
            .unwrap();
        assert_eq!(decision, HookDecision::Allow);

        let decision = dispatch(&manager, "NoSuchHook", &json!({})).await.unwrap();
        assert_eq!(decision, HookDecision::Allow);
    }

    #[tokio::test]
    async fn test_caller_errors_surface() {
        let (manager, _) = manager();
        let err = dispatch(&manager, "Stop", &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotStarted));

        dispatch(&manager, "SessionStart", &json!({"session_id": "a"}))
            .await
            .unwrap();
        let err = dispatch(&manager, "SessionStart", &json!({"session_id": "b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DoubleSessionStart(_)));
    }

    #[tokio::test]
    async fn test_hooks_before_start_are_ignored() {
        let (manager, _) = manager();
        let decision = dispatch(
            &manager,
            "PreToolUse",
            &json!({"tool_name": "Read", "tool_use_id": "t"}),
        )
        .await
        .unwrap();
        assert_eq!(decision, HookDecision::Allow);
        assert_eq!(manager.open_tools(), 0);
    }

    #[tokio::test]
    async fn test_finish_run_closes_with_error_status() {
        let (manager, transport) = manager();
        manager.start(Some("s"), None).unwrap();
        manager.finish_run(false).await;

        let session = transport
            .spans()
            .into_iter()
            .find(|s| s.kind == SpanKind::Session)
            .unwrap();
        assert_eq!(session.attributes.get_text("session.status"), Some("error"));
    }
}
