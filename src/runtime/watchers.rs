//! Confirmation watchers
//!
//! Each watcher runs on its own worker thread and reports into the tracker
//! through a channel. Every event carries the race id it was armed for, so
//! anything still in flight after a re-arm is rejected by the session.
//!
//! The fast watcher hedges two paths: a push subscription to the Flashblocks
//! stream and a receipt poll against the preconfirmation RPC. Whichever sees
//! the transaction first settles it; the sibling notices the shared flag and
//! stops.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::core::constants::{
    CANONICAL_WAIT_TIMEOUT, FAST_EXCLUSION_TIMEOUT, FAST_POLL_ATTEMPTS, FAST_POLL_INTERVAL,
    PUSH_RECONNECT_INITIAL, PUSH_RECONNECT_MAX, SOCKET_READ_TIMEOUT,
};
use crate::core::io_traits::{
    CancelGuard, CancelToken, CanonicalWaiter, FastFeedLookup, FeedConnector, FeedError,
    FeedSubscription, Replacement, RpcError,
};
use crate::core::protocol::{parse_hex_u64, secs_to_millis, BlockRef, FlashblockMessage, TxReceipt};
use crate::core::session::{WatcherEvent, WatcherEventKind};
use crate::core::traits::Clock;
use crate::core::types::{DetectionPath, Millis, RaceId, TxHash};

// =============================================================================
// TYPES
// =============================================================================

/// Budgets for the watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherTimings {
    /// Push path gives up after this long
    pub fast_exclusion_timeout: Duration,
    pub fast_poll_interval: Duration,
    /// Poll path gives up after this many lookups
    pub fast_poll_attempts: u32,
    pub canonical_wait_timeout: Duration,
}

impl Default for WatcherTimings {
    fn default() -> Self {
        Self {
            fast_exclusion_timeout: FAST_EXCLUSION_TIMEOUT,
            fast_poll_interval: FAST_POLL_INTERVAL,
            fast_poll_attempts: FAST_POLL_ATTEMPTS,
            canonical_wait_timeout: CANONICAL_WAIT_TIMEOUT,
        }
    }
}

/// What every watcher thread needs to report back
#[derive(Clone)]
pub struct WatcherContext {
    pub race: RaceId,
    pub tx: TxHash,
    pub events: Sender<WatcherEvent>,
    pub clock: Arc<dyn Clock>,
}

impl WatcherContext {
    fn emit(&self, kind: WatcherEventKind) {
        if self.events.send(WatcherEvent::new(self.race, kind)).is_err() {
            debug!(race = %self.race, "Event dropped, tracker gone");
        }
    }
}

/// Owner handle of a running watcher
///
/// Releasing signals the worker threads and detaches them; it never blocks on
/// an in-flight network call. Release is idempotent and also runs on drop.
pub struct WatcherHandle {
    name: &'static str,
    race: RaceId,
    cancel: Option<CancelGuard>,
    threads: Vec<JoinHandle<()>>,
}

impl WatcherHandle {
    fn new(name: &'static str, race: RaceId, cancel: CancelGuard) -> Self {
        Self {
            name,
            race,
            cancel: Some(cancel),
            threads: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn race(&self) -> RaceId {
        self.race
    }

    pub fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            debug!(watcher = self.name, race = %self.race, "Watcher released");
        }
        self.threads.clear();
    }

    pub fn is_released(&self) -> bool {
        self.cancel.is_none()
    }

    /// All worker threads have returned
    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|t| t.is_finished())
    }

    /// Wait for the worker threads; only for teardown and tests
    pub fn join(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Spawn a named worker; a panic runs `on_panic` instead of unwinding silently
fn spawn_worker<F, P>(name: &str, body: F, on_panic: P) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
    P: FnOnce() + Send + 'static,
{
    let thread_name = name.to_string();
    let result = thread::Builder::new().name(name.to_string()).spawn(move || {
        if let Err(panic_info) = catch_unwind(AssertUnwindSafe(body)) {
            let msg = panic_info
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic_info.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            error!(thread = %thread_name, panic = %msg, "Watcher thread panic");
            on_panic();
        }
    });
    match result {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(thread = name, error = %e, "Failed to spawn watcher thread");
            None
        }
    }
}

// =============================================================================
// FAST WATCHER
// =============================================================================

/// State shared by the push and poll paths of one fast watcher
struct FastShared {
    /// Set by whichever path reports first
    settled: AtomicBool,
    /// Paths still running; the last one to die unsettled reports exclusion
    alive: AtomicUsize,
}

impl FastShared {
    fn report_confirmed(&self, ctx: &WatcherContext, at: Millis, path: DetectionPath) {
        self.settled.store(true, Ordering::SeqCst);
        ctx.emit(WatcherEventKind::FastConfirmed { at, path });
    }

    fn report_excluded(&self, ctx: &WatcherContext) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            ctx.emit(WatcherEventKind::FastExcluded);
        }
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    fn path_died(&self, ctx: &WatcherContext) {
        if self.alive.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.report_excluded(ctx);
        }
    }
}

/// Start both fast paths for `ctx.tx`
pub fn spawn_fast_watcher(
    ctx: WatcherContext,
    connector: Arc<dyn FeedConnector>,
    lookup: Arc<dyn FastFeedLookup>,
    timings: WatcherTimings,
) -> WatcherHandle {
    let (guard, token) = CancelToken::pair();
    let mut handle = WatcherHandle::new("fast", ctx.race, guard);
    let shared = Arc::new(FastShared {
        settled: AtomicBool::new(false),
        alive: AtomicUsize::new(2),
    });

    info!(race = %ctx.race, tx = %ctx.tx, "[FAST] Watching push stream and preconf receipts");

    let push = {
        let (ctx, token, shared) = (ctx.clone(), token.clone(), Arc::clone(&shared));
        let (panic_ctx, panic_shared) = (ctx.clone(), Arc::clone(&shared));
        spawn_worker(
            "fast-push",
            move || run_push_path(&ctx, connector.as_ref(), &token, &shared, timings),
            move || panic_shared.path_died(&panic_ctx),
        )
    };
    let poll = {
        let (ctx, token, shared) = (ctx.clone(), token, Arc::clone(&shared));
        let (panic_ctx, panic_shared) = (ctx.clone(), Arc::clone(&shared));
        spawn_worker(
            "fast-poll",
            move || run_poll_path(&ctx, lookup.as_ref(), &token, &shared, timings),
            move || panic_shared.path_died(&panic_ctx),
        )
    };

    for worker in [push, poll] {
        match worker {
            Some(t) => handle.threads.push(t),
            None => shared.path_died(&ctx),
        }
    }
    handle
}

enum PushOutcome {
    Seen(Millis),
    Stopped,
    Deadline,
    Dropped(FeedError),
}

fn run_push_path(
    ctx: &WatcherContext,
    connector: &dyn FeedConnector,
    cancel: &CancelToken,
    shared: &FastShared,
    timings: WatcherTimings,
) {
    let deadline = Instant::now() + timings.fast_exclusion_timeout;
    let mut backoff = PUSH_RECONNECT_INITIAL;

    loop {
        if cancel.is_cancelled() || shared.is_settled() {
            return;
        }

        match connector.subscribe() {
            Ok(mut subscription) => {
                backoff = PUSH_RECONNECT_INITIAL;
                let outcome = watch_subscription(ctx, subscription.as_mut(), cancel, shared, deadline);
                subscription.close();
                match outcome {
                    PushOutcome::Seen(at) => {
                        info!(race = %ctx.race, at, "[FAST] Seen on push stream");
                        shared.report_confirmed(ctx, at, DetectionPath::Push);
                        return;
                    }
                    PushOutcome::Stopped => return,
                    PushOutcome::Deadline => break,
                    PushOutcome::Dropped(e) => {
                        warn!(race = %ctx.race, error = %e, "[FAST] Push stream dropped")
                    }
                }
            }
            Err(e) => warn!(race = %ctx.race, error = %e, "[FAST] Push connect failed"),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        debug!(race = %ctx.race, delay_ms = backoff.as_millis() as u64, "[FAST] Reconnecting push stream");
        if !cancel.sleep(backoff.min(remaining)) {
            return;
        }
        backoff = (backoff * 2).min(PUSH_RECONNECT_MAX);
    }

    if !cancel.is_cancelled() && !shared.is_settled() {
        info!(race = %ctx.race, "[FAST] Not seen on push stream before deadline");
        shared.report_excluded(ctx);
    }
}

fn watch_subscription(
    ctx: &WatcherContext,
    subscription: &mut dyn FeedSubscription,
    cancel: &CancelToken,
    shared: &FastShared,
    deadline: Instant,
) -> PushOutcome {
    loop {
        if cancel.is_cancelled() || shared.is_settled() {
            return PushOutcome::Stopped;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return PushOutcome::Deadline;
        }

        match subscription.next_frame(SOCKET_READ_TIMEOUT.min(remaining)) {
            Ok(Some(text)) => {
                let received_at = ctx.clock.now_ms();
                match FlashblockMessage::parse(&text) {
                    Ok(msg) if msg.contains_tx(&ctx.tx) => {
                        return PushOutcome::Seen(msg.block_timestamp_ms().unwrap_or(received_at));
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "[FAST] Ignoring malformed frame"),
                }
            }
            Ok(None) => {}
            Err(e) => return PushOutcome::Dropped(e),
        }
    }
}

fn run_poll_path(
    ctx: &WatcherContext,
    lookup: &dyn FastFeedLookup,
    cancel: &CancelToken,
    shared: &FastShared,
    timings: WatcherTimings,
) {
    for attempt in 1..=timings.fast_poll_attempts {
        if !cancel.sleep(timings.fast_poll_interval) || shared.is_settled() {
            return;
        }

        match lookup.transaction_receipt(&ctx.tx) {
            Ok(Some(receipt)) => {
                let at = block_time_ms(lookup, &receipt).unwrap_or_else(|| ctx.clock.now_ms());
                info!(race = %ctx.race, attempt, at, "[FAST] Preconf receipt found");
                shared.report_confirmed(ctx, at, DetectionPath::Poll);
                return;
            }
            Ok(None) => debug!(race = %ctx.race, attempt, "[FAST] No preconf receipt yet"),
            Err(e) => warn!(race = %ctx.race, attempt, error = %e, "[FAST] Receipt lookup failed"),
        }
    }

    if !cancel.is_cancelled() && !shared.is_settled() {
        info!(
            race = %ctx.race,
            attempts = timings.fast_poll_attempts,
            "[FAST] Poll attempts exhausted"
        );
        shared.report_excluded(ctx);
    }
}

/// Authoritative time of the receipt's block, by hash then by number
fn block_time_ms(lookup: &dyn FastFeedLookup, receipt: &TxReceipt) -> Option<Millis> {
    let primary = receipt.block_ref()?;
    let secs = match lookup.block_timestamp(&primary) {
        Ok(secs) => secs,
        Err(e) => {
            let by_number = receipt
                .block_number
                .as_deref()
                .and_then(parse_hex_u64)
                .map(BlockRef::Number)
                .filter(|r| *r != primary);
            match by_number.map(|r| lookup.block_timestamp(&r)) {
                Some(Ok(secs)) => secs,
                _ => {
                    warn!(error = %e, "[FAST] Block time unavailable, using local time");
                    return None;
                }
            }
        }
    };
    let millis = secs_to_millis(secs);
    if millis.is_none() {
        warn!(secs, "[FAST] Block time out of range, using local time");
    }
    millis
}

// =============================================================================
// CANONICAL WATCHER
// =============================================================================

/// Start the canonical receipt wait for `ctx.tx`
pub fn spawn_canonical_watcher(
    ctx: WatcherContext,
    waiter: Arc<dyn CanonicalWaiter>,
    timings: WatcherTimings,
) -> WatcherHandle {
    let (guard, token) = CancelToken::pair();
    let mut handle = WatcherHandle::new("canonical", ctx.race, guard);

    info!(race = %ctx.race, tx = %ctx.tx, "[CANON] Waiting for canonical receipt");

    let panic_ctx = ctx.clone();
    let fallback_ctx = ctx.clone();
    let worker = spawn_worker(
        "canonical",
        move || run_canonical(&ctx, waiter.as_ref(), &token, timings),
        move || {
            panic_ctx.emit(WatcherEventKind::SlowFailed {
                reason: "canonical watcher panicked".to_string(),
            })
        },
    );
    match worker {
        Some(t) => handle.threads.push(t),
        None => fallback_ctx.emit(WatcherEventKind::SlowFailed {
            reason: "canonical watcher could not start".to_string(),
        }),
    }
    handle
}

fn run_canonical(
    ctx: &WatcherContext,
    waiter: &dyn CanonicalWaiter,
    cancel: &CancelToken,
    timings: WatcherTimings,
) {
    let mut on_replaced = |replacement: Replacement| {
        ctx.emit(WatcherEventKind::Replaced(replacement));
    };
    let outcome = waiter.wait_for_receipt(
        &ctx.tx,
        timings.canonical_wait_timeout,
        cancel,
        &mut on_replaced,
    );

    match outcome {
        Ok(receipt) => {
            let at = ctx.clock.now_ms();
            if receipt.status.as_deref() == Some("0x0") {
                warn!(race = %ctx.race, tx = %receipt.transaction_hash, "[CANON] Transaction reverted");
            }
            info!(race = %ctx.race, at, "[CANON] Canonical receipt");
            ctx.emit(WatcherEventKind::SlowConfirmed { at });
        }
        Err(RpcError::Cancelled) => debug!(race = %ctx.race, "[CANON] Wait cancelled"),
        Err(e) => {
            warn!(race = %ctx.race, error = %e, "[CANON] Wait failed");
            ctx.emit(WatcherEventKind::SlowFailed {
                reason: e.to_string(),
            });
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
