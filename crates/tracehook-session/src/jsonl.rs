//! JSONL export transport
//!
//! Writes each exported record as one JSON line. Spans and log records go to
//! a file per session, metric deltas to a shared `metrics.jsonl`. Useful for local
//! debugging when no collector is running.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracehook_core::{ExportPayload, ExportTransport, TransportError};

const METRICS_FILE: &str = "metrics.jsonl";

/// Keep only characters that are safe in a file name
fn sanitize_session_id(session_id: &str) -> String {
    let sanitized: String = session_id
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(255)
        .collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[derive(Debug, Clone)]
pub struct JsonlTransport {
    dir: PathBuf,
}

impl JsonlTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the spans of `session_id`
    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", sanitize_session_id(session_id)))
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    async fn append(&self, path: &Path, lines: &[String]) -> Result<(), TransportError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        for line in lines {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ExportTransport for JsonlTransport {
    async fn export(&self, batch: Vec<ExportPayload>) -> Result<(), TransportError> {
        // Group by destination so each file is opened once per batch
        let mut by_file: HashMap<PathBuf, Vec<String>> = HashMap::new();
        for payload in &batch {
            let path = match payload {
                ExportPayload::Span(span) => self.session_file(span.session_id.as_str()),
                ExportPayload::Log(log) => self.session_file(log.session_id.as_str()),
                ExportPayload::Metric(_) => self.metrics_file(),
            };
            by_file
                .entry(path)
                .or_default()
                .push(serde_json::to_string(payload)?);
        }

        for (path, lines) in by_file {
            self.append(&path, &lines).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}
