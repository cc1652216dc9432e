//! Core types - platform-independent race data structures
//!
//! These types describe one confirmation race and are shared by the session,
//! the watchers and the presentation layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::format::format_time;

/// Milliseconds since the Unix epoch
pub type Millis = i64;

// =============================================================================
// TRANSACTION HASH
// =============================================================================

/// Opaque transaction identifier (0x-prefixed hex)
///
/// Comparison ignores ASCII case: feeds disagree on checksum casing.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw hash string
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for TxHash {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// RACE IDENTITY
// =============================================================================

/// Generation counter of an armed race
///
/// Every watcher event carries the generation it was started for, so late
/// callbacks from a previous race can be told apart from the current one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RaceId(pub u64);

impl RaceId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// CONFIRMATION STATES
// =============================================================================

/// Which fast-watcher path observed the inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPath {
    /// Flashblocks WebSocket stream
    Push,
    /// Receipt lookup on the preconfirmation RPC
    Poll,
}

/// Fast feed outcome: waiting, included at a timestamp, or excluded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FastConfirmation {
    #[default]
    Pending,
    Confirmed { at: Millis, path: DetectionPath },
    /// The exclusion budget ran out without the feed seeing the transaction
    NotIncluded,
}

impl FastConfirmation {
    pub fn is_settled(&self) -> bool {
        !matches!(self, FastConfirmation::Pending)
    }

    pub fn confirmed_at(&self) -> Option<Millis> {
        match self {
            FastConfirmation::Confirmed { at, .. } => Some(*at),
            _ => None,
        }
    }
}

/// Canonical feed outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SlowConfirmation {
    #[default]
    Pending,
    Confirmed { at: Millis },
    /// Wait timed out or errored; lets the race terminate
    Failed { reason: String },
}

impl SlowConfirmation {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SlowConfirmation::Pending)
    }

    pub fn confirmed_at(&self) -> Option<Millis> {
        match self {
            SlowConfirmation::Confirmed { at } => Some(*at),
            _ => None,
        }
    }
}

/// Race lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RacePhase {
    #[default]
    Idle,
    /// Transaction submitted, watchers starting
    Armed,
    /// Both watchers active
    Racing,
    /// Result emitted
    Decided,
}

// =============================================================================
// RACE RESULT
// =============================================================================

/// Final, immutable outcome of one race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceResult {
    pub fast_elapsed_ms: i64,
    pub slow_elapsed_ms: i64,
    pub delta_ms: i64,
    pub fast_included: bool,
    pub slow_confirmed: bool,
}

impl RaceResult {
    /// One-line outcome for status text
    pub fn summary(&self) -> String {
        match (self.fast_included, self.slow_confirmed) {
            (true, true) if self.delta_ms > 0 => format!(
                "Flashblock won by {:.2}s!",
                self.delta_ms as f64 / 1000.0
            ),
            (true, true) => format!(
                "Flashblock {} vs regular block {}",
                format_time(self.fast_elapsed_ms),
                format_time(self.slow_elapsed_ms)
            ),
            (false, true) => format!(
                "Not included in a Flashblock, regular block took {}",
                format_time(self.slow_elapsed_ms)
            ),
            (true, false) => format!(
                "Flashblock in {}, canonical confirmation failed",
                format_time(self.fast_elapsed_ms)
            ),
            (false, false) => "Transaction was not confirmed".to_string(),
        }
    }
}
