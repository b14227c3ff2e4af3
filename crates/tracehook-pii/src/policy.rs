//! Compiled redaction policy

use crate::config::RedactionConfig;
use crate::detector::{DEFAULT_PATTERNS, Detector, PatternSource, RegexDetector};
use crate::redactor::{MarkerRedactor, TextRedactor, truncate, truncate_bytes};
use crate::sanitized::Sanitized;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Problems found while building a redaction policy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Redaction config not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Malformed redaction config {path}: {reason}")]
    MalformedConfig { path: PathBuf, reason: String },

    #[error("Invalid redaction pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Length budgets applied after pattern substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedactionLimits {
    /// Maximum characters of a text attribute
    pub max_attr_length: usize,

    /// Maximum bytes of a captured payload
    pub max_payload_bytes: usize,
}

impl Default for RedactionLimits {
    fn default() -> Self {
        Self {
            max_attr_length: 256,
            max_payload_bytes: 1024,
        }
    }
}

/// Immutable redaction policy compiled once per process run
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    detector: RegexDetector,
    redactor: MarkerRedactor,
    limits: RedactionLimits,
}

impl RedactionPolicy {
    /// Built-in patterns only, default limits
    pub fn defaults() -> Self {
        let (policy, _) = Self::compile_lenient(&RedactionConfig::default(), RedactionLimits::default());
        policy
    }

    /// Compile strictly, failing on the first invalid pattern
    pub fn compile(config: &RedactionConfig, limits: RedactionLimits) -> Result<Self, PolicyError> {
        let patterns = pattern_list(config);
        let allowlist = config.all_allowlist();

        let detector = RegexDetector::new(&patterns, &allowlist).map_err(|e| {
            // regex::Error does not carry the pattern, find the culprit
            let pattern = patterns
                .iter()
                .map(|(_, p)| p)
                .chain(allowlist.iter())
                .find(|p| Regex::new(p).is_err())
                .cloned()
                .unwrap_or_default();
            PolicyError::InvalidPattern {
                pattern,
                reason: e.to_string(),
            }
        })?;

        Ok(Self::from_parts(detector, limits))
    }

    /// Compile, skipping invalid patterns and reporting each one
    pub fn compile_lenient(config: &RedactionConfig, limits: RedactionLimits) -> (Self, Vec<PolicyError>) {
        let mut warnings = Vec::new();

        let mut patterns = Vec::new();
        for (source, pattern) in pattern_list(config) {
            match Regex::new(&pattern) {
                Ok(re) => patterns.push((source, re)),
                Err(e) => warnings.push(PolicyError::InvalidPattern {
                    pattern,
                    reason: e.to_string(),
                }),
            }
        }

        let mut allowlist = Vec::new();
        for pattern in config.all_allowlist() {
            match Regex::new(&pattern) {
                Ok(re) => allowlist.push(re),
                Err(e) => warnings.push(PolicyError::InvalidPattern {
                    pattern,
                    reason: e.to_string(),
                }),
            }
        }

        for warning in &warnings {
            tracing::warn!("Skipping redaction pattern: {}", warning);
        }

        let detector = RegexDetector::from_compiled(patterns, allowlist);
        (Self::from_parts(detector, limits), warnings)
    }

    fn from_parts(detector: RegexDetector, limits: RedactionLimits) -> Self {
        Self {
            detector,
            redactor: MarkerRedactor::default(),
            limits,
        }
    }

    pub fn limits(&self) -> RedactionLimits {
        self.limits
    }

    /// Number of active redaction patterns (defaults plus custom)
    pub fn pattern_count(&self) -> usize {
        self.detector.pattern_count()
    }

    pub fn allowlist_count(&self) -> usize {
        self.detector.allowlist_count()
    }

    /// Redact and cut to the attribute length budget
    pub fn sanitize(&self, raw: &str) -> Sanitized {
        self.sanitize_with_budget(raw, self.limits.max_attr_length)
    }

    /// Redact and cut to an explicit character budget
    pub fn sanitize_with_budget(&self, raw: &str, budget: usize) -> Sanitized {
        let (redacted, was_redacted) = self.redact(raw);
        let (text, was_truncated) = truncate(&redacted, budget);
        Sanitized::new(text, was_redacted, was_truncated)
    }

    /// Sanitize a JSON value. Strings use their contents, everything else is
    /// rendered as compact JSON first.
    pub fn sanitize_json(&self, value: &Value, budget: usize) -> Sanitized {
        match value {
            Value::String(s) => self.sanitize_with_budget(s, budget),
            other => self.sanitize_with_budget(&other.to_string(), budget),
        }
    }

    /// Sanitize a raw payload.
    ///
    /// The full text is redacted before it is cut to the payload byte budget.
    /// Returns the sanitized text and the original byte size.
    pub fn sanitize_payload(&self, raw: &[u8]) -> (Sanitized, usize) {
        let original_size = raw.len();
        let decoded = String::from_utf8_lossy(raw);
        let (redacted, was_redacted) = self.redact(&decoded);
        let (cut, was_truncated) = truncate_bytes(&redacted, self.limits.max_payload_bytes);
        (
            Sanitized::new(cut.to_string(), was_redacted, was_truncated),
            original_size,
        )
    }

    fn redact(&self, raw: &str) -> (String, bool) {
        let detections = self.detector.detect(raw);
        if detections.is_empty() {
            return (raw.to_string(), false);
        }
        (self.redactor.redact(raw, &detections), true)
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}

fn pattern_list(config: &RedactionConfig) -> Vec<(PatternSource, String)> {
    let mut patterns = Vec::new();
    if config.use_defaults {
        patterns.extend(
            DEFAULT_PATTERNS
                .iter()
                .map(|p| (PatternSource::Default, p.to_string())),
        );
    }
    patterns.extend(
        config
            .all_patterns()
            .into_iter()
            .map(|p| (PatternSource::Custom, p)),
    );
    patterns
}
