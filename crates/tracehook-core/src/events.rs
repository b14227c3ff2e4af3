//! Hook events
//!
//! The wrapped agent reports its lifecycle as named hooks with a JSON payload.
//! `HookEvent::parse` turns a `(name, payload)` pair into one typed variant per
//! hook so the session layer can match on them exhaustively.

use crate::error::{Error, Result};
use crate::usage::TokenCounts;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// One lifecycle event reported by the wrapped agent
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    SessionStart(SessionStart),
    UserPromptSubmit(PromptSubmit),
    PreToolUse(ToolStart),
    PostToolUse(ToolEnd),
    TurnComplete(TurnComplete),
    PreCompact(Compaction),
    Stop(Stop),
    Interrupt(Interrupt),
}

impl HookEvent {
    /// Parse a hook by name. Unknown names and missing required fields are
    /// reported as `MalformedHookPayload`.
    pub fn parse(name: &str, payload: &Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::malformed(name, "payload is not a JSON object"));
        }

        let event = match name {
            "SessionStart" => HookEvent::SessionStart(decode(name, payload)?),
            "UserPromptSubmit" => HookEvent::UserPromptSubmit(decode(name, payload)?),
            "PreToolUse" => HookEvent::PreToolUse(decode(name, payload)?),
            "PostToolUse" => HookEvent::PostToolUse(decode(name, payload)?),
            "TurnComplete" | "MessageComplete" => HookEvent::TurnComplete(decode(name, payload)?),
            "PreCompact" => HookEvent::PreCompact(decode(name, payload)?),
            "Stop" | "SessionEnd" => HookEvent::Stop(decode(name, payload)?),
            "Interrupt" => HookEvent::Interrupt(decode(name, payload)?),
            other => return Err(Error::malformed(other, "unknown hook name")),
        };
        Ok(event)
    }

    /// Canonical hook name
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::SessionStart(_) => "SessionStart",
            HookEvent::UserPromptSubmit(_) => "UserPromptSubmit",
            HookEvent::PreToolUse(_) => "PreToolUse",
            HookEvent::PostToolUse(_) => "PostToolUse",
            HookEvent::TurnComplete(_) => "TurnComplete",
            HookEvent::PreCompact(_) => "PreCompact",
            HookEvent::Stop(_) => "Stop",
            HookEvent::Interrupt(_) => "Interrupt",
        }
    }

    /// Session id carried by the payload, if any
    pub fn session_id(&self) -> Option<&str> {
        let raw = match self {
            HookEvent::SessionStart(e) => e.session_id.as_deref(),
            HookEvent::UserPromptSubmit(e) => e.session_id.as_deref(),
            HookEvent::PreToolUse(e) => e.session_id.as_deref(),
            HookEvent::PostToolUse(e) => e.session_id.as_deref(),
            HookEvent::TurnComplete(e) => e.session_id.as_deref(),
            HookEvent::PreCompact(e) => e.session_id.as_deref(),
            HookEvent::Stop(e) => e.session_id.as_deref(),
            HookEvent::Interrupt(e) => e.session_id.as_deref(),
        };
        raw.filter(|s| !s.is_empty())
    }
}

fn decode<T: DeserializeOwned>(hook: &str, payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone()).map_err(|e| Error::malformed(hook, e.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptSubmit {
    pub session_id: Option<String>,
    #[serde(default)]
    pub prompt: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStart {
    pub session_id: Option<String>,
    pub tool_name: String,
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub tool_input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnd {
    pub session_id: Option<String>,
    pub tool_name: String,
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub tool_input: Value,
    pub tool_response: Option<Value>,
}

impl ToolEnd {
    /// A response reports failure through a truthy `error` or `isError` field
    pub fn is_error(&self) -> bool {
        let Some(Value::Object(map)) = &self.tool_response else {
            return false;
        };
        map.get("error").is_some_and(is_truthy) || map.get("isError").is_some_and(is_truthy)
    }

    /// Error detail for the `tool.error` attribute
    pub fn error_message(&self) -> Option<String> {
        let Some(Value::Object(map)) = &self.tool_response else {
            return None;
        };
        match map.get("error") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(v) if is_truthy(v) => Some(v.to_string()),
            _ if map.get("isError").is_some_and(is_truthy) => {
                Some("Tool execution failed".to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnComplete {
    pub session_id: Option<String>,
    pub usage: Option<TokenCounts>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compaction {
    pub session_id: Option<String>,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    pub custom_instructions: Option<String>,
}

fn default_trigger() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub session_id: Option<String>,
    pub transcript_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub session_id: Option<String>,
}

/// JSON truthiness: null, false, zero, and empty containers are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
