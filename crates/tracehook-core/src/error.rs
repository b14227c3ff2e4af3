//! Error types for Tracehook Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed hook payload for {hook}: {reason}")]
    MalformedHookPayload { hook: String, reason: String },

    // Transcript reconciliation
    #[error("Transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    #[error("Transcript corrupt: {0}")]
    TranscriptCorrupt(String),

    #[error("Redaction policy invalid: {0}")]
    RedactionPolicyInvalid(#[from] tracehook_pii::PolicyError),

    #[error("Export transport failure: {0}")]
    ExportTransport(#[from] crate::transport::TransportError),

    // Caller contract violations
    #[error("Session already started: {0}")]
    DoubleSessionStart(String),

    #[error("Session not started")]
    SessionNotStarted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error reports a misuse by the caller rather than a
    /// telemetry fault that should be recovered locally
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Error::DoubleSessionStart(_) | Error::SessionNotStarted)
    }

    pub(crate) fn malformed(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedHookPayload {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
