//! Tracehook Session Engine
//!
//! This crate turns agent hook events into session telemetry:
//! - Session, turn and tool lifecycle tracking
//! - Token usage aggregation and transcript reconciliation
//! - The bounded, non-blocking export pipeline
//! - Hook dispatch

pub mod export;
pub mod handler;
pub mod jsonl;
pub mod lifecycle;
pub mod tool_tracker;
pub mod transcript;
pub mod usage;

pub use export::{DrainReport, ExportPipeline, ExportQueue, PipelineStats};
pub use handler::{HookDecision, HookHandler, dispatch};
pub use jsonl::JsonlTransport;
pub use lifecycle::{CloseReport, InterruptOutcome, SessionManager, SessionState, SessionStatus};
pub use tool_tracker::{PendingTool, ToolTracker};
pub use transcript::{TranscriptUsage, parse_transcript, read_transcript};
pub use usage::{TokenAggregator, UsageEntry};
