//! Result reconciliation
//!
//! Turns the settled confirmation slots of a session into one `RaceResult`.
//! Pure function of the session fields: calling it again on an unchanged
//! session yields the same value.

use crate::core::session::RaceSession;
use crate::core::types::{Millis, RaceResult};

/// Build the race result, or `None` while the race is undecidable
pub fn reconcile(session: &RaceSession) -> Option<RaceResult> {
    if !session.is_decidable() {
        return None;
    }

    let origin = session.submitted_at();
    let fast_at = session.fast().confirmed_at();
    let slow_at = session.slow().confirmed_at();

    let fast_elapsed_ms = fast_at.map_or(0, |at| elapsed(origin, at));
    let slow_elapsed_ms = slow_at.map_or(0, |at| elapsed(origin, at));

    Some(RaceResult {
        fast_elapsed_ms,
        slow_elapsed_ms,
        delta_ms: slow_elapsed_ms.saturating_sub(fast_elapsed_ms),
        fast_included: fast_at.is_some(),
        slow_confirmed: slow_at.is_some(),
    })
}

/// Milliseconds from `origin` to `at`, clamped at 0
///
/// Block timestamps have one-second granularity and can predate submission.
pub fn elapsed(origin: Millis, at: Millis) -> i64 {
    at.saturating_sub(origin).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{WatcherEvent, WatcherEventKind};
    use crate::core::types::{DetectionPath, TxHash};

    const T0: Millis = 1_700_000_000_820;

    fn decided(fast: WatcherEventKind, slow: WatcherEventKind) -> RaceSession {
        let mut session = RaceSession::new();
        let race = session.arm(TxHash::new("0xaaa"), T0);
        session.mark_racing();
        session.apply(&WatcherEvent::new(race, fast));
        session.apply(&WatcherEvent::new(race, slow));
        session
    }

    #[test]
    fn test_reconcile_pending_is_none() {
        let mut session = RaceSession::new();
        session.arm(TxHash::new("0xaaa"), T0);
        assert!(reconcile(&session).is_none());
    }

    #[test]
    fn test_reconcile_both_confirmed() {
        let session = decided(
            WatcherEventKind::FastConfirmed {
                at: T0 + 180,
                path: DetectionPath::Push,
            },
            WatcherEventKind::SlowConfirmed { at: T0 + 2050 },
        );
        let result = reconcile(&session).unwrap();
        assert_eq!(
            result,
            RaceResult {
                fast_elapsed_ms: 180,
                slow_elapsed_ms: 2050,
                delta_ms: 1870,
                fast_included: true,
                slow_confirmed: true,
            }
        );
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut session = decided(
            WatcherEventKind::FastExcluded,
            WatcherEventKind::SlowConfirmed { at: T0 + 2050 },
        );
        let first = reconcile(&session).unwrap();
        let second = reconcile(&session).unwrap();
        assert_eq!(first, second);

        // Still identical once the session itself is Decided
        session.evaluate();
        assert_eq!(reconcile(&session).unwrap(), first);
        assert_eq!(session.result(), Some(&first));
    }

    #[test]
    fn test_reconcile_block_time_before_submission_clamped() {
        let session = decided(
            WatcherEventKind::FastConfirmed {
                at: T0 - 820,
                path: DetectionPath::Push,
            },
            WatcherEventKind::SlowConfirmed { at: T0 + 1900 },
        );
        let result = reconcile(&session).unwrap();
        assert_eq!(result.fast_elapsed_ms, 0);
        assert_eq!(result.delta_ms, 1900);
    }

    #[test]
    fn test_reconcile_extreme_timestamps_do_not_overflow() {
        let session = decided(
            WatcherEventKind::FastConfirmed {
                at: i64::MIN + 808,
                path: DetectionPath::Push,
            },
            WatcherEventKind::SlowConfirmed { at: i64::MAX },
        );
        let result = reconcile(&session).unwrap();
        assert_eq!(result.fast_elapsed_ms, 0);
        assert_eq!(result.slow_elapsed_ms, i64::MAX - T0);
        assert_eq!(result.delta_ms, i64::MAX - T0);
        assert_eq!(elapsed(T0, i64::MIN), 0);
    }

    #[test]
    fn test_reconcile_canonical_failure() {
        let session = decided(
            WatcherEventKind::FastExcluded,
            WatcherEventKind::SlowFailed {
                reason: "rpc down".to_string(),
            },
        );
        let result = reconcile(&session).unwrap();
        assert!(!result.fast_included);
        assert!(!result.slow_confirmed);
        assert_eq!(result.delta_ms, 0);
        assert_eq!(result.summary(), "Transaction was not confirmed");
    }
}
