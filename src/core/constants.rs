//! Race constants - timeouts, polling budgets, expected cadences
//!
//! Every timing knob of the confirmation race lives here. The runtime config
//! can override the watcher timings, the rest are fixed display constants.

use std::time::Duration;

// =============================================================================
// FAST FEED (FLASHBLOCKS)
// =============================================================================

/// Budget for the push subscription to see the transaction before it is
/// declared not included
pub const FAST_EXCLUSION_TIMEOUT: Duration = Duration::from_secs(20);

/// Delay between receipt lookups on the preconfirmation RPC
pub const FAST_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum number of receipt lookups before the poll path gives up
pub const FAST_POLL_ATTEMPTS: u32 = 20;

/// Initial delay before reconnecting a dropped push subscription
pub const PUSH_RECONNECT_INITIAL: Duration = Duration::from_secs(1);

/// Upper bound for the push reconnect backoff
pub const PUSH_RECONNECT_MAX: Duration = Duration::from_secs(8);

/// Read timeout on the subscription socket, bounds how long a worker can
/// go without checking its shutdown flag
pub const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on the TCP connect and the TLS/WebSocket handshake of a push feed
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// CANONICAL FEED
// =============================================================================

/// Budget for the canonical receipt wait
pub const CANONICAL_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between canonical receipt lookups
pub const CANONICAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// INTERPOLATION
// =============================================================================

/// Expected Flashblock confirmation time in milliseconds
pub const EXPECTED_FAST_MS: f64 = 200.0;

/// Expected regular block confirmation time in milliseconds
pub const EXPECTED_SLOW_MS: f64 = 2000.0;

/// Progress ceiling reachable by elapsed-time extrapolation alone
pub const PROGRESS_CAP: f64 = 95.0;

/// Progress of a confirmed lane
pub const PROGRESS_FINISHED: f64 = 100.0;

/// Slowest speed ever displayed for a moving car
pub const SPEED_FLOOR: f64 = 20.0;

/// Fast lane cruising speed (scaled by progress) and finish-line speed
pub const FAST_BASE_SPEED: f64 = 180.0;
pub const FAST_TOP_SPEED: f64 = 200.0;

/// Slow lane cruising speed (scaled by progress) and finish-line speed
pub const SLOW_BASE_SPEED: f64 = 90.0;
pub const SLOW_TOP_SPEED: f64 = 100.0;

// =============================================================================
// BLOCK CADENCE MONITOR
// =============================================================================

/// Number of recent blocks kept per feed
pub const BLOCK_HISTORY_LEN: usize = 5;

/// Bar width of the regular feed in the speed comparison (percent)
pub const CADENCE_BASE_WIDTH: f64 = 20.0;

/// Maximum bar width of the Flashblocks feed (percent)
pub const CADENCE_MAX_WIDTH: f64 = 80.0;

// =============================================================================
// CHANNELS
// =============================================================================

/// Capacity of the watcher -> tracker event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 128;
