//! Core traits - time source abstraction
//!
//! Every timestamp the race records goes through a `Clock`, so tests can
//! drive elapsed time by hand instead of sleeping.

use super::types::Millis;

// =============================================================================
// CLOCK
// =============================================================================

/// Wall-clock source in Unix milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }
}

// =============================================================================
// TEST MOCKS
// =============================================================================
