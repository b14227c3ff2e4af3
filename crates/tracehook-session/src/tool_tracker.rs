//! Tracks open tool invocations between their start and end hooks
//!
//! Several tools may run at once within one turn, and their start/end hooks
//! can arrive from different tasks. Open invocations live in a `DashMap`
//! keyed by `tool_use_id`. Hooks without an id get a generated key and are
//! matched back by tool name, most recent first.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracehook_core::SpanRecord;

/// A tool invocation waiting for its end hook
#[derive(Debug, Clone)]
pub struct PendingTool {
    pub tool_name: String,
    pub tool_use_id: Option<String>,
    /// Turn the tool started in, 0 when no turn was open
    pub turn: u32,
    /// Record opened at start time; closed when the end hook arrives
    pub record: SpanRecord,
    order: u64,
}

impl PendingTool {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.record.start_time
    }
}

#[derive(Debug, Default)]
pub struct ToolTracker {
    pending: DashMap<String, PendingTool>,
    next_order: AtomicU64,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a started tool. Returns the key used to track it.
    pub fn start(
        &self,
        tool_name: &str,
        tool_use_id: Option<&str>,
        turn: u32,
        record: SpanRecord,
    ) -> String {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        let key = match tool_use_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("{tool_name}_{order}"),
        };

        let previous = self.pending.insert(
            key.clone(),
            PendingTool {
                tool_name: tool_name.to_string(),
                tool_use_id: tool_use_id.filter(|id| !id.is_empty()).map(str::to_string),
                turn,
                record,
                order,
            },
        );
        if previous.is_some() {
            tracing::debug!(key = %key, "Tool started twice, keeping the later start");
        }
        key
    }

    /// Remove the invocation an end hook refers to
    pub fn finish(&self, tool_name: &str, tool_use_id: Option<&str>) -> Option<PendingTool> {
        if let Some(id) = tool_use_id.filter(|id| !id.is_empty())
            && let Some((_, pending)) = self.pending.remove(id)
        {
            return Some(pending);
        }

        // Fall back to the most recent unnamed start of the same tool
        let key = self
            .pending
            .iter()
            .filter(|entry| entry.tool_name == tool_name && entry.tool_use_id.is_none())
            .max_by_key(|entry| entry.order)
            .map(|entry| entry.key().clone())?;
        self.pending.remove(&key).map(|(_, pending)| pending)
    }

    /// Remove every open invocation, oldest first
    pub fn drain(&self) -> Vec<PendingTool> {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained: Vec<PendingTool> = keys
            .iter()
            .filter_map(|key| self.pending.remove(key).map(|(_, pending)| pending))
            .collect();
        drained.sort_by_key(|pending| pending.order);
        drained
    }

    /// Keys of tools opened in `turn`
    pub fn open_in_turn(&self, turn: u32) -> Vec<String> {
        let mut open: Vec<(u64, String)> = self
            .pending
            .iter()
            .filter(|entry| entry.turn == turn)
            .map(|entry| (entry.order, entry.key().clone()))
            .collect();
        open.sort();
        open.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
