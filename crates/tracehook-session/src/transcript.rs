//! Transcript usage extraction
//!
//! At session close the agent points at its transcript file. Three layouts
//! are accepted: an object with a `messages` array, a bare array, or JSONL
//! with one entry per line. Usage comes from `usage` or `message.usage` of
//! assistant entries; the entry position is its sequence marker.

use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracehook_core::{Error, Result, TokenCounts};

/// Usage recovered from one transcript read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptUsage {
    /// `(sequence, counts)` per counted exchange, in transcript order
    pub entries: Vec<(u64, TokenCounts)>,
    /// Last model named by an assistant entry
    pub model: Option<String>,
    /// Entries examined
    pub messages: usize,
    /// JSONL lines that failed to parse
    pub corrupt_lines: usize,
}

impl TranscriptUsage {
    pub fn total(&self) -> TokenCounts {
        self.entries
            .iter()
            .fold(TokenCounts::default(), |acc, (_, counts)| acc + *counts)
    }
}

/// Read and parse a transcript file
pub async fn read_transcript(path: &Path) -> Result<TranscriptUsage> {
    let raw = tokio::fs::read(path).await.map_err(|e| {
        Error::TranscriptUnavailable(format!("{}: {}", path.display(), e))
    })?;
    let text = String::from_utf8_lossy(&raw);
    parse_transcript(&text)
}

/// Parse transcript text in any accepted layout
pub fn parse_transcript(text: &str) -> Result<TranscriptUsage> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(TranscriptUsage::default());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(mut map)) => match map.remove("messages") {
            Some(Value::Array(messages)) => Ok(extract(messages.into_iter().enumerate(), 0)),
            Some(_) => Err(Error::TranscriptCorrupt(
                "`messages` is not an array".to_string(),
            )),
            // A single-line JSONL transcript
            None => Ok(extract(std::iter::once((0, Value::Object(map))), 0)),
        },
        Ok(Value::Array(messages)) => Ok(extract(messages.into_iter().enumerate(), 0)),
        Ok(_) => Err(Error::TranscriptCorrupt(
            "transcript is neither an object nor an array".to_string(),
        )),
        Err(_) => parse_jsonl(trimmed),
    }
}

fn parse_jsonl(text: &str) -> Result<TranscriptUsage> {
    let mut corrupt = 0;
    let mut lines = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => lines.push((index, value)),
            Err(e) => {
                corrupt += 1;
                tracing::debug!(line = index + 1, error = %e, "Skipping corrupt transcript line");
            }
        }
    }

    if lines.is_empty() {
        return Err(Error::TranscriptCorrupt(format!(
            "no parseable entries ({corrupt} corrupt lines)"
        )));
    }

    Ok(extract(lines.into_iter(), corrupt))
}

fn extract<I>(entries: I, corrupt_lines: usize) -> TranscriptUsage
where
    I: Iterator<Item = (usize, Value)>,
{
    let mut usage = TranscriptUsage {
        corrupt_lines,
        ..Default::default()
    };
    let mut seen_ids = HashSet::new();

    for (position, entry) in entries {
        usage.messages += 1;
        if !is_assistant(&entry) {
            continue;
        }
        let message = entry.get("message");

        if let Some(model) = message
            .and_then(|m| m.get("model"))
            .or_else(|| entry.get("model"))
            .and_then(Value::as_str)
        {
            usage.model = Some(model.to_string());
        }

        let Some(counts) = entry
            .get("usage")
            .or_else(|| message.and_then(|m| m.get("usage")))
            .and_then(|u| serde_json::from_value::<TokenCounts>(u.clone()).ok())
        else {
            continue;
        };
        if counts.is_zero() {
            continue;
        }

        // Streamed content blocks repeat the usage of one exchange
        if let Some(id) = message.and_then(|m| m.get("id")).and_then(Value::as_str)
            && !seen_ids.insert(id.to_string())
        {
            continue;
        }

        usage.entries.push((position as u64, counts));
    }

    usage
}

/// Entries without any role marker are treated as assistant output
fn is_assistant(entry: &Value) -> bool {
    let markers = [
        entry.get("type"),
        entry.get("role"),
        entry.get("message").and_then(|m| m.get("role")),
    ];
    let mut any = false;
    for marker in markers.into_iter().flatten().filter_map(Value::as_str) {
        if marker == "assistant" {
            return true;
        }
        any = true;
    }
    !any
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn messages_transcript() -> Value {
        serde_json::json!({
            "messages": [
                {"role": "user", "content": "Hello"},
                {
                    "role": "assistant",
                    "content": "Hi there!",
                    "usage": {
                        "input_tokens": 100,
                        "output_tokens": 50,
                        "cache_read_input_tokens": 0,
                        "cache_creation_input_tokens": 0
                    }
                },
                {"role": "user", "content": "How are you?"},
                {
                    "role": "assistant",
                    "content": "I'm doing well!",
                    "usage": {
                        "input_tokens": 150,
                        "output_tokens": 75,
                        "cache_read_input_tokens": 100,
                        "cache_creation_input_tokens": 50
                    }
                }
            ]
        })
    }

    #[test]
    fn test_messages_object() {
        let usage = parse_transcript(&messages_transcript().to_string()).unwrap();
        assert_eq!(usage.messages, 4);
        assert_eq!(usage.entries.len(), 2);
        assert_eq!(usage.entries[0].0, 1);
        assert_eq!(usage.entries[1].0, 3);
        assert_eq!(usage.total(), TokenCounts::new(250, 125).with_cache(100, 50));
    }

    #[test]
    fn test_bare_array() {
        let text = r#"[{"role":"assistant","content":"Response","usage":{"input_tokens":100,"output_tokens":50}}]"#;
        let usage = parse_transcript(text).unwrap();
        assert_eq!(usage.total(), TokenCounts::new(100, 50));
    }

    #[test]
    fn test_jsonl_with_nested_usage_and_dedup() {
        let text = [
            r#"{"type":"user","message":{"role":"user","content":"hi"}}"#,
            r#"{"type":"assistant","message":{"id":"msg_1","model":"claude-x","usage":{"input_tokens":10,"output_tokens":3}}}"#,
            r#"{"type":"assistant","message":{"id":"msg_1","model":"claude-x","usage":{"input_tokens":10,"output_tokens":3}}}"#,
            "{not json",
            "",
            r#"{"type":"assistant","message":{"id":"msg_2","model":"claude-y","usage":{"input_tokens":7,"output_tokens":2,"cache_read_input_tokens":4}}}"#,
        ]
        .join("\n");

        let usage = parse_transcript(&text).unwrap();
        assert_eq!(usage.corrupt_lines, 1);
        assert_eq!(usage.entries.len(), 2);
        assert_eq!(usage.entries[0].0, 1);
        assert_eq!(usage.entries[1].0, 5);
        assert_eq!(usage.total(), TokenCounts::new(17, 5).with_cache(4, 0));
        assert_eq!(usage.model.as_deref(), Some("claude-y"));
    }

    #[test]
    fn test_user_usage_ignored() {
        let text = r#"[{"role":"user","usage":{"input_tokens":99,"output_tokens":99}}]"#;
        assert!(parse_transcript(text).unwrap().entries.is_empty());
    }

    #[test]
    fn test_corrupt_transcript() {
        assert!(matches!(
            parse_transcript("{invalid json"),
            Err(Error::TranscriptCorrupt(_))
        ));
        assert!(matches!(
            parse_transcript(r#"{"messages": 5}"#),
            Err(Error::TranscriptCorrupt(_))
        ));
        assert!(matches!(parse_transcript("42"), Err(Error::TranscriptCorrupt(_))));
    }

    #[test]
    fn test_empty_transcript() {
        let usage = parse_transcript("   \n").unwrap();
        assert!(usage.entries.is_empty());
        assert_eq!(usage.messages, 0);
    }

    #[tokio::test]
    async fn test_read_transcript_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", messages_transcript()).unwrap();

        let usage = read_transcript(file.path()).await.unwrap();
        assert_eq!(usage.total(), TokenCounts::new(250, 125).with_cache(100, 50));
    }

    #[tokio::test]
    async fn test_missing_transcript_file() {
        let err = read_transcript(Path::new("/nonexistent/path/transcript.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TranscriptUnavailable(_)));
    }
}
