//! Position/speed interpolation for the race track
//!
//! Converts elapsed time plus the confirmation slots into lane progress on a
//! 0-100 scale. Extrapolation alone stops at `PROGRESS_CAP`; only a real
//! confirmation moves a lane to the finish line. Speed is display-only.

use crate::core::constants::{
    EXPECTED_FAST_MS, EXPECTED_SLOW_MS, FAST_BASE_SPEED, FAST_TOP_SPEED, PROGRESS_CAP,
    PROGRESS_FINISHED, SLOW_BASE_SPEED, SLOW_TOP_SPEED, SPEED_FLOOR,
};
use crate::core::reconciler::elapsed;
use crate::core::session::RaceSession;
use crate::core::types::{FastConfirmation, Millis, RacePhase, SlowConfirmation};

/// Which car a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Fast,
    Slow,
}

impl Lane {
    fn base_speed(self) -> f64 {
        match self {
            Lane::Fast => FAST_BASE_SPEED,
            Lane::Slow => SLOW_BASE_SPEED,
        }
    }

    fn top_speed(self) -> f64 {
        match self {
            Lane::Fast => FAST_TOP_SPEED,
            Lane::Slow => SLOW_TOP_SPEED,
        }
    }
}

/// One frame of lane positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceProgress {
    pub fast_progress: f64,
    pub slow_progress: f64,
    pub fast_speed: f64,
    pub slow_speed: f64,
}

impl RaceProgress {
    pub fn from_positions(fast_progress: f64, slow_progress: f64) -> Self {
        Self {
            fast_progress,
            slow_progress,
            fast_speed: speed(Lane::Fast, fast_progress),
            slow_speed: speed(Lane::Slow, slow_progress),
        }
    }
}

/// Interpolator with tunable expected durations
#[derive(Debug, Clone, Copy)]
pub struct Interpolator {
    expected_fast_ms: f64,
    expected_slow_ms: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(EXPECTED_FAST_MS, EXPECTED_SLOW_MS)
    }
}

impl Interpolator {
    pub fn new(expected_fast_ms: f64, expected_slow_ms: f64) -> Self {
        Self {
            expected_fast_ms: expected_fast_ms.max(1.0),
            expected_slow_ms: expected_slow_ms.max(1.0),
        }
    }

    /// Sample the lanes at `now`; `None` unless the session is Racing
    pub fn sample(&self, session: &RaceSession, now: Millis) -> Option<RaceProgress> {
        if session.phase() != RacePhase::Racing {
            return None;
        }
        let elapsed_ms = elapsed(session.submitted_at(), now) as f64;

        let fast = match session.fast() {
            FastConfirmation::Confirmed { .. } => PROGRESS_FINISHED,
            FastConfirmation::NotIncluded => 0.0,
            FastConfirmation::Pending => extrapolate(elapsed_ms, self.expected_fast_ms),
        };
        let slow = match session.slow() {
            SlowConfirmation::Confirmed { .. } => PROGRESS_FINISHED,
            SlowConfirmation::Failed { .. } => 0.0,
            SlowConfirmation::Pending => extrapolate(elapsed_ms, self.expected_slow_ms),
        };
        Some(RaceProgress::from_positions(fast, slow))
    }

    /// Final positions of a Decided session (no time dependence)
    pub fn settled(&self, session: &RaceSession) -> Option<RaceProgress> {
        let result = session.result()?;
        let fast = if result.fast_included {
            PROGRESS_FINISHED
        } else {
            0.0
        };
        let slow = if result.slow_confirmed {
            PROGRESS_FINISHED
        } else {
            0.0
        };
        Some(RaceProgress::from_positions(fast, slow))
    }
}

fn extrapolate(elapsed_ms: f64, expected_ms: f64) -> f64 {
    (elapsed_ms / expected_ms * 100.0).min(PROGRESS_CAP)
}

/// Display speed for a lane at the given progress
///
/// At or past the cap a lane shows its top speed; below it the cruising
/// speed scales with progress, never under the floor.
pub fn speed(lane: Lane, progress: f64) -> f64 {
    if progress >= PROGRESS_CAP {
        return lane.top_speed();
    }
    (lane.base_speed() * progress / 100.0).max(SPEED_FLOOR)
}
