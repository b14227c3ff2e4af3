//! Token usage ledger
//!
//! Usage arrives from two producers: per-turn counts reported as turns
//! complete, and session totals recovered from the transcript at close. Both
//! are appended to one ledger as tagged entries and merged by a fixed rule:
//!
//! - A real-time entry is accepted once per turn ordinal.
//! - Reconciled entries are accepted only past the high-water sequence mark,
//!   so re-reading the same transcript adds nothing.
//! - Once any real-time entry exists, reconciled counts no longer change the
//!   totals. They are kept aside so a disagreement can be reported.
//! - Without real-time data, accepted reconciled entries land on pseudo-turn 0.

use serde::Serialize;
use std::collections::BTreeSet;
use tracehook_core::{TokenCounts, UsageSource};

/// Turn ordinal used for reconciled usage
pub const RECONCILED_TURN: u32 = 0;

/// One accepted ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageEntry {
    pub source: UsageSource,
    pub turn: u32,
    /// Position in the transcript for reconciled entries
    pub sequence: Option<u64>,
    pub counts: TokenCounts,
}

/// Result of offering a real-time entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealTimeOutcome {
    Accepted,
    /// The turn already has a real-time entry
    Duplicate,
    /// Turn ordinals start at 1
    InvalidTurn,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Entries past the high-water mark
    pub accepted: usize,
    /// Entries at or below the high-water mark
    pub skipped: usize,
    /// Counts added to the session totals
    pub added: TokenCounts,
    /// True when real-time data kept the reconciled counts out of the totals
    pub superseded: bool,
}

#[derive(Debug, Default)]
pub struct TokenAggregator {
    entries: Vec<UsageEntry>,
    real_time_turns: BTreeSet<u32>,
    high_water: Option<u64>,
    /// Everything reconciliation has reported, accepted into totals or not
    reconciled_seen: TokenCounts,
}

impl TokenAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the usage reported when `turn` completed
    pub fn record_real_time(&mut self, turn: u32, counts: TokenCounts) -> RealTimeOutcome {
        if turn == RECONCILED_TURN {
            return RealTimeOutcome::InvalidTurn;
        }
        if !self.real_time_turns.insert(turn) {
            tracing::debug!(turn, "Ignoring duplicate real-time usage");
            return RealTimeOutcome::Duplicate;
        }
        self.entries.push(UsageEntry {
            source: UsageSource::RealTime,
            turn,
            sequence: None,
            counts,
        });
        RealTimeOutcome::Accepted
    }

    /// Merge usage recovered from a transcript. Each item is a sequence
    /// marker and the counts of one exchange.
    pub fn reconcile<I>(&mut self, entries: I) -> ReconcileOutcome
    where
        I: IntoIterator<Item = (u64, TokenCounts)>,
    {
        let superseded = self.has_real_time();
        let mut outcome = ReconcileOutcome {
            superseded,
            ..Default::default()
        };

        for (sequence, counts) in entries {
            if self.high_water.is_some_and(|mark| sequence <= mark) {
                outcome.skipped += 1;
                continue;
            }
            self.high_water = Some(sequence);
            self.reconciled_seen += counts;
            outcome.accepted += 1;

            if superseded {
                continue;
            }
            outcome.added += counts;
            self.entries.push(UsageEntry {
                source: UsageSource::Reconciled,
                turn: RECONCILED_TURN,
                sequence: Some(sequence),
                counts,
            });
        }

        if outcome.accepted > 0 {
            tracing::debug!(
                accepted = outcome.accepted,
                skipped = outcome.skipped,
                superseded,
                "Reconciled transcript usage"
            );
        }
        outcome
    }

    /// Session totals: the sum of every accepted entry
    pub fn totals(&self) -> TokenCounts {
        self.entries
            .iter()
            .fold(TokenCounts::default(), |acc, entry| acc + entry.counts)
    }

    /// Usage attributed to one turn ordinal
    pub fn turn_usage(&self, turn: u32) -> Option<TokenCounts> {
        let mut matched = self.entries.iter().filter(|e| e.turn == turn).peekable();
        matched.peek()?;
        Some(matched.fold(TokenCounts::default(), |acc, e| acc + e.counts))
    }

    pub fn has_real_time(&self) -> bool {
        !self.real_time_turns.is_empty()
    }

    /// Source the totals came from, if any usage was accepted
    pub fn source(&self) -> Option<UsageSource> {
        if self.has_real_time() {
            Some(UsageSource::RealTime)
        } else if self.entries.is_empty() {
            None
        } else {
            Some(UsageSource::Reconciled)
        }
    }

    /// Reconciled counts that disagree with the real-time totals
    pub fn discrepancy(&self) -> Option<TokenCounts> {
        if !self.has_real_time() || self.reconciled_seen.is_zero() {
            return None;
        }
        (self.reconciled_seen != self.totals()).then_some(self.reconciled_seen)
    }

    pub fn high_water_mark(&self) -> Option<u64> {
        self.high_water
    }

    pub fn entries(&self) -> &[UsageEntry] {
        &self.entries
    }
}
