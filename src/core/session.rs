//! Race session - the confirmation race state machine
//!
//! RaceSession holds the only shared mutable state of a race: the two
//! confirmation slots. Watchers never touch it directly; they report
//! `WatcherEvent`s which the owner applies one at a time, each followed by
//! a completion check. This keeps every write atomic with respect to the
//! completion evaluation without locks.
//!
//! # Lifecycle
//!
//! `Idle → Armed → Racing → Decided`, and `arm` from any phase starts over.
//! Each `arm` bumps the race generation; events stamped with another
//! generation are stale and ignored.

use tracing::debug;

use crate::core::io_traits::Replacement;
use crate::core::reconciler::reconcile;
use crate::core::types::{
    DetectionPath, FastConfirmation, Millis, RaceId, RacePhase, RaceResult, SlowConfirmation,
    TxHash,
};

// =============================================================================
// WATCHER EVENTS
// =============================================================================

/// What a watcher observed
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEventKind {
    /// Fast feed saw the transaction
    FastConfirmed { at: Millis, path: DetectionPath },
    /// Fast feed budget ran out
    FastExcluded,
    /// Canonical receipt observed
    SlowConfirmed { at: Millis },
    /// Canonical wait gave up
    SlowFailed { reason: String },
    /// The transaction was superseded while waiting
    Replaced(Replacement),
}

/// A watcher observation stamped with the race it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherEvent {
    pub race: RaceId,
    pub kind: WatcherEventKind,
}

impl WatcherEvent {
    pub fn new(race: RaceId, kind: WatcherEventKind) -> Self {
        Self { race, kind }
    }
}

/// Effect of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event wrote a field
    Applied,
    /// The field was already set; nothing changed
    Duplicate,
    /// The event belongs to another race (or no race is armed)
    Stale,
}

// =============================================================================
// RACE SESSION
// =============================================================================

/// One race in flight
#[derive(Debug, Clone, Default)]
pub struct RaceSession {
    race_id: RaceId,
    tx_hash: Option<TxHash>,
    submitted_at: Millis,
    fast: FastConfirmation,
    slow: SlowConfirmation,
    replaced_by: Option<TxHash>,
    phase: RacePhase,
    result: Option<RaceResult>,
}

impl RaceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every field and arm a new race
    ///
    /// Never rejects: arming over a Racing or Decided session starts over.
    pub fn arm(&mut self, tx_hash: TxHash, submitted_at: Millis) -> RaceId {
        let race_id = self.race_id.next();
        *self = Self {
            race_id,
            tx_hash: Some(tx_hash),
            submitted_at,
            phase: RacePhase::Armed,
            ..Self::default()
        };
        race_id
    }

    /// Both watchers are launched
    pub fn mark_racing(&mut self) {
        if self.phase == RacePhase::Armed {
            self.phase = RacePhase::Racing;
        }
    }

    /// Apply a watcher observation with first-writer-wins per field
    pub fn apply(&mut self, event: &WatcherEvent) -> ApplyOutcome {
        if event.race != self.race_id || self.phase == RacePhase::Idle {
            debug!(
                event_race = %event.race,
                current = %self.race_id,
                "[SESSION] Ignoring stale event"
            );
            return ApplyOutcome::Stale;
        }

        match &event.kind {
            WatcherEventKind::FastConfirmed { at, path } => {
                if self.fast.is_settled() {
                    return ApplyOutcome::Duplicate;
                }
                self.fast = FastConfirmation::Confirmed {
                    at: *at,
                    path: *path,
                };
            }
            WatcherEventKind::FastExcluded => {
                if self.fast.is_settled() {
                    return ApplyOutcome::Duplicate;
                }
                self.fast = FastConfirmation::NotIncluded;
            }
            WatcherEventKind::SlowConfirmed { at } => {
                if self.slow.is_settled() {
                    return ApplyOutcome::Duplicate;
                }
                self.slow = SlowConfirmation::Confirmed { at: *at };
            }
            WatcherEventKind::SlowFailed { reason } => {
                if self.slow.is_settled() {
                    return ApplyOutcome::Duplicate;
                }
                self.slow = SlowConfirmation::Failed {
                    reason: reason.clone(),
                };
            }
            WatcherEventKind::Replaced(replacement) => {
                if self.replaced_by.as_ref() == Some(&replacement.replacement) {
                    return ApplyOutcome::Duplicate;
                }
                self.replaced_by = Some(replacement.replacement.clone());
            }
        }
        ApplyOutcome::Applied
    }

    /// Canonical feed settled and fast feed settled
    pub fn is_decidable(&self) -> bool {
        self.slow.is_settled() && self.fast.is_settled()
    }

    /// Completion evaluator, run after every applied write
    ///
    /// Returns the result the one time the session becomes Decided.
    pub fn evaluate(&mut self) -> Option<RaceResult> {
        if !matches!(self.phase, RacePhase::Armed | RacePhase::Racing) {
            return None;
        }
        let result = reconcile(self)?;
        self.result = Some(result);
        self.phase = RacePhase::Decided;
        Some(result)
    }

    pub fn race_id(&self) -> RaceId {
        self.race_id
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        self.tx_hash.as_ref()
    }

    pub fn submitted_at(&self) -> Millis {
        self.submitted_at
    }

    pub fn fast(&self) -> FastConfirmation {
        self.fast
    }

    pub fn slow(&self) -> &SlowConfirmation {
        &self.slow
    }

    pub fn replaced_by(&self) -> Option<&TxHash> {
        self.replaced_by.as_ref()
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn is_racing(&self) -> bool {
        self.phase == RacePhase::Racing
    }

    /// Result of a Decided session, kept until the next `arm`
    pub fn result(&self) -> Option<&RaceResult> {
        self.result.as_ref()
    }
}

// =============================================================================
// TESTS
// =============================================================================
