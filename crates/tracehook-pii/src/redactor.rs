//! Detection masking and length budgets

use crate::detector::Detection;

/// Replacement written over every redacted span
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Suffix written at the end of truncated text
pub const TRUNCATION_MARKER: &str = "...[TRUNC]";

/// Trait for replacing detected spans in text
pub trait TextRedactor: Send + Sync {
    /// Replace every detected span, returning the rewritten text
    fn redact(&self, text: &str, detections: &[Detection]) -> String;
}

/// Replaces detections with a fixed marker, merging overlapping spans
#[derive(Debug, Clone)]
pub struct MarkerRedactor {
    marker: String,
}

impl MarkerRedactor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl Default for MarkerRedactor {
    fn default() -> Self {
        Self::new(REDACTION_MARKER)
    }
}

impl TextRedactor for MarkerRedactor {
    fn redact(&self, text: &str, detections: &[Detection]) -> String {
        if detections.is_empty() {
            return text.to_string();
        }

        let mut spans: Vec<(usize, usize)> = detections
            .iter()
            .filter(|d| d.start < d.end && d.end <= text.len())
            .map(|d| (d.start, d.end))
            .collect();
        spans.sort_unstable();

        // Overlapping matches from different pattern sets collapse into one marker
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end) in merged {
            out.push_str(&text[cursor..start]);
            out.push_str(&self.marker);
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

/// Cut `text` to at most `budget` characters.
///
/// When cut, the result ends with [`TRUNCATION_MARKER`] if the budget leaves
/// room for it. Returns the text and whether truncation happened.
pub fn truncate(text: &str, budget: usize) -> (String, bool) {
    if text.chars().count() <= budget {
        return (text.to_string(), false);
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if budget <= marker_len {
        return (text.chars().take(budget).collect(), true);
    }

    let mut out: String = text.chars().take(budget - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    (out, true)
}

/// Cut `text` to at most `max_bytes` bytes on a character boundary
pub(crate) fn truncate_bytes(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}
