//! Tracehook Redaction
//!
//! This crate sanitizes text before it is attached to telemetry records:
//! - Built-in secret patterns (API keys, passwords, bearer tokens, AWS keys)
//! - Custom patterns and allowlists from the environment or a JSON file
//! - Length budgets with truncation flags
//! - A `Sanitized` text type that only this crate can produce

pub mod config;
pub mod detector;
pub mod policy;
pub mod redactor;
pub mod sanitized;

pub use config::RedactionConfig;
pub use detector::{DEFAULT_PATTERNS, Detection, Detector, PatternSource, RegexDetector};
pub use policy::{PolicyError, RedactionLimits, RedactionPolicy};
pub use redactor::{MarkerRedactor, REDACTION_MARKER, TRUNCATION_MARKER, TextRedactor, truncate};
pub use sanitized::Sanitized;
