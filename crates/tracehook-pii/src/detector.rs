//! Secret detectors

mod regex_detector;

pub use regex_detector::RegexDetector;

use serde::{Deserialize, Serialize};

/// Built-in patterns for text that likely contains credentials.
///
/// Kept broad on purpose; allowlists are the escape hatch for false positives.
pub const DEFAULT_PATTERNS: &[&str] = &[
    r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S+",
    r"(?i)(secret|password|passwd|pwd)\s*[=:]\s*\S+",
    r"(?i)(token|bearer)\s*[=:]\s*\S+",
    r"(?i)(auth|authorization)\s*[=:]\s*\S+",
    r"(?i)(private[_-]?key)\s*[=:]\s*\S+",
    // AWS access key ids
    r"(?i)AKIA[0-9A-Z]{16}",
    r"(?i)aws[_-]?(secret|access)[_-]?key\s*[=:]\s*\S+",
    // Long base64-looking runs
    r"[A-Za-z0-9+/]{40,}={0,2}",
];

/// A span of text matched by a redaction pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Which pattern set produced the match
    pub source: PatternSource,

    /// Start byte offset in the text
    pub start: usize,

    /// End byte offset in the text (exclusive)
    pub end: usize,

    /// The matched text
    pub text: String,
}

/// Origin of a redaction pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    /// Built-in pattern set
    Default,

    /// Pattern from the environment or a config file
    Custom,
}

/// Trait for finding redactable spans in text
pub trait Detector: Send + Sync {
    /// Detect matches that are not protected by an allowlist, sorted by position
    fn detect(&self, text: &str) -> Vec<Detection>;

    /// Number of active redaction patterns
    fn pattern_count(&self) -> usize;
}
