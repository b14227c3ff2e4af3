//! End-to-end test support for Tracehook
//!
//! Helpers that wire a `SessionManager` to an in-memory or deliberately
//! misbehaving transport so the integration tests can drive full hook
//! sequences.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracehook_core::{
    ExportPayload, ExportTransport, MemoryTransport, TelemetryConfig, TransportError,
};
use tracehook_session::SessionManager;

/// Transport that waits before delegating to a `MemoryTransport`
#[derive(Debug, Clone)]
pub struct SlowTransport {
    pub delay: Duration,
    pub inner: MemoryTransport,
}

impl SlowTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryTransport::new(),
        }
    }
}

#[async_trait]
impl ExportTransport for SlowTransport {
    async fn export(&self, batch: Vec<ExportPayload>) -> Result<(), TransportError> {
        tokio::time::sleep(self.delay).await;
        self.inner.export(batch).await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.inner.flush().await
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Defaults with a short schedule delay so tests do not wait on the batcher
pub fn test_config() -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.export.schedule_delay_ms = 20;
    config.shutdown_timeout_ms = 2_000;
    config
}

/// Build a manager the way a hook process would, with `env` standing in for
/// the process environment
pub fn manager_with_env(
    config: TelemetryConfig,
    transport: Arc<dyn ExportTransport>,
    env: &[(&str, &str)],
) -> SessionManager {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SessionManager::from_config(config, transport, move |key| env.get(key).cloned())
}

pub fn memory_manager(config: TelemetryConfig) -> (SessionManager, MemoryTransport) {
    let transport = MemoryTransport::new();
    let manager = manager_with_env(config, Arc::new(transport.clone()), &[]);
    (manager, transport)
}

/// Write a `messages` transcript with one assistant reply per `(input, output)`
pub fn write_transcript(turns: &[(u64, u64)]) -> std::io::Result<NamedTempFile> {
    let messages: Vec<Value> = turns
        .iter()
        .enumerate()
        .flat_map(|(i, (input, output))| {
            [
                json!({"role": "user", "content": format!("question {i}")}),
                json!({
                    "role": "assistant",
                    "model": "claude-test",
                    "content": format!("answer {i}"),
                    "usage": {"input_tokens": input, "output_tokens": output}
                }),
            ]
        })
        .collect();

    let mut file = NamedTempFile::new()?;
    write!(file, "{}", json!({ "messages": messages }))?;
    Ok(file)
}
