//! Race tracker - drives one confirmation race at a time
//!
//! Owns the session and the watcher handles. Watcher events are applied on
//! the caller's thread, one at a time, from `update()`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::core::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::interpolator::{Interpolator, RaceProgress};
use crate::core::io_traits::{
    CanonicalWaiter, FastFeedLookup, FeedConnector, Replacement, RpcError,
};
use crate::core::reconciler::elapsed;
use crate::core::session::{ApplyOutcome, RaceSession, WatcherEvent, WatcherEventKind};
use crate::core::traits::Clock;
use crate::core::types::{DetectionPath, Millis, RaceId, RaceResult, TxHash};

use super::config::Config;
use super::rpc::{ReceiptWaiter, RpcClient};
use super::watchers::{
    spawn_canonical_watcher, spawn_fast_watcher, WatcherContext, WatcherHandle, WatcherTimings,
};
use super::websocket::WsFeed;

// =============================================================================
// CHAIN CLIENTS
// =============================================================================

/// The three chain-facing dependencies of a race
#[derive(Clone)]
pub struct ChainClients {
    pub fast_feed: Arc<dyn FeedConnector>,
    pub fast_lookup: Arc<dyn FastFeedLookup>,
    pub canonical: Arc<dyn CanonicalWaiter>,
}

impl ChainClients {
    /// Real clients for the configured endpoints
    pub fn from_config(config: &Config) -> Result<Self, RpcError> {
        let endpoints = &config.endpoints;
        let preconf = RpcClient::new(endpoints.flashblock_rpc.clone())?;
        let regular = RpcClient::new(endpoints.regular_rpc.clone())?;
        Ok(Self {
            fast_feed: Arc::new(WsFeed::raw(&endpoints.flashblock_ws)),
            fast_lookup: Arc::new(preconf),
            canonical: Arc::new(
                ReceiptWaiter::new(Arc::new(regular))
                    .with_poll_interval(config.timing.canonical_poll_interval()),
            ),
        })
    }
}

// =============================================================================
// TRACKER EVENTS
// =============================================================================

/// Notable changes, for status text and logs
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Armed { race: RaceId, tx: TxHash },
    FastConfirmed { elapsed_ms: i64, path: DetectionPath },
    FastExcluded,
    SlowConfirmed { elapsed_ms: i64 },
    SlowFailed { reason: String },
    Replaced(Replacement),
    Decided(RaceResult),
}

// =============================================================================
// RACE TRACKER
// =============================================================================

pub struct RaceTracker {
    clients: ChainClients,
    clock: Arc<dyn Clock>,
    timings: WatcherTimings,
    interpolator: Interpolator,

    session: RaceSession,
    events: Option<Receiver<WatcherEvent>>,
    fast_watcher: Option<WatcherHandle>,
    canonical_watcher: Option<WatcherHandle>,

    last_progress: Option<RaceProgress>,
    pending: Vec<TrackerEvent>,
}

impl RaceTracker {
    pub fn new(
        clients: ChainClients,
        clock: Arc<dyn Clock>,
        timings: WatcherTimings,
        interpolator: Interpolator,
    ) -> Self {
        Self {
            clients,
            clock,
            timings,
            interpolator,
            session: RaceSession::new(),
            events: None,
            fast_watcher: None,
            canonical_watcher: None,
            last_progress: None,
            pending: Vec::new(),
        }
    }

    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, RpcError> {
        let clients = ChainClients::from_config(config)?;
        Ok(Self::new(
            clients,
            clock,
            config.timing.watcher_timings(),
            config.timing.interpolator(),
        ))
    }

    /// Arm a new race for `tx` and launch both watchers
    ///
    /// Whatever the previous race was doing, its watchers are released first.
    pub fn start_race(&mut self, tx: TxHash, submitted_at: Millis) -> RaceId {
        self.release_all();

        let race = self.session.arm(tx.clone(), submitted_at);
        let (sender, receiver) = bounded(EVENT_CHANNEL_CAPACITY);
        self.events = Some(receiver);
        self.pending.clear();
        info!(race = %race, tx = %tx, submitted_at, "[RACE] Armed");

        let ctx = WatcherContext {
            race,
            tx: tx.clone(),
            events: sender,
            clock: Arc::clone(&self.clock),
        };
        self.fast_watcher = Some(spawn_fast_watcher(
            ctx.clone(),
            Arc::clone(&self.clients.fast_feed),
            Arc::clone(&self.clients.fast_lookup),
            self.timings,
        ));
        self.canonical_watcher = Some(spawn_canonical_watcher(
            ctx,
            Arc::clone(&self.clients.canonical),
            self.timings,
        ));

        self.session.mark_racing();
        self.last_progress = Some(RaceProgress::from_positions(0.0, 0.0));
        self.pending.push(TrackerEvent::Armed { race, tx });
        race
    }

    /// Apply every queued watcher event; returns how many were applied
    pub fn update(&mut self) -> usize {
        let Some(events) = self.events.clone() else {
            return 0;
        };
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            if self.apply_event(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Apply queued events and sample the lanes at `now`
    ///
    /// Returns `None` once the race has left Racing; `last_progress` then
    /// holds the final positions.
    pub fn frame(&mut self, now: Millis) -> Option<RaceProgress> {
        self.update();
        let progress = self.interpolator.sample(&self.session, now)?;
        self.last_progress = Some(progress);
        Some(progress)
    }

    /// Block until the race is decided or `timeout` passes
    pub fn wait_for_decision(&mut self, timeout: Duration) -> Option<RaceResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.session.result() {
                return Some(*result);
            }
            let events = self.events.clone()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) => {
                    self.apply_event(event);
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("[RACE] Watchers gone before a decision");
                    return None;
                }
            }
        }
    }

    pub fn last_progress(&self) -> Option<RaceProgress> {
        self.last_progress
    }

    pub fn session(&self) -> &RaceSession {
        &self.session
    }

    pub fn result(&self) -> Option<&RaceResult> {
        self.session.result()
    }

    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Release both watchers; safe to call any number of times
    pub fn release_all(&mut self) {
        if let Some(mut handle) = self.fast_watcher.take() {
            handle.release();
        }
        if let Some(mut handle) = self.canonical_watcher.take() {
            handle.release();
        }
    }

    fn apply_event(&mut self, event: WatcherEvent) -> bool {
        match self.session.apply(&event) {
            ApplyOutcome::Applied => {}
            outcome => {
                debug!(race = %event.race, ?outcome, "[RACE] Event not applied");
                return false;
            }
        }

        let origin = self.session.submitted_at();
        let notice = match event.kind {
            WatcherEventKind::FastConfirmed { at, path } => {
                info!(race = %event.race, elapsed_ms = elapsed(origin, at), ?path, "[RACE] Fast confirmation");
                TrackerEvent::FastConfirmed {
                    elapsed_ms: elapsed(origin, at),
                    path,
                }
            }
            WatcherEventKind::FastExcluded => {
                info!(race = %event.race, "[RACE] Not included in a Flashblock");
                TrackerEvent::FastExcluded
            }
            WatcherEventKind::SlowConfirmed { at } => {
                info!(race = %event.race, elapsed_ms = elapsed(origin, at), "[RACE] Canonical confirmation");
                TrackerEvent::SlowConfirmed {
                    elapsed_ms: elapsed(origin, at),
                }
            }
            WatcherEventKind::SlowFailed { reason } => {
                warn!(race = %event.race, reason = %reason, "[RACE] Canonical confirmation failed");
                TrackerEvent::SlowFailed { reason }
            }
            WatcherEventKind::Replaced(replacement) => TrackerEvent::Replaced(replacement),
        };
        self.pending.push(notice);

        if self.session.fast().is_settled() {
            if let Some(mut handle) = self.fast_watcher.take() {
                handle.release();
            }
        }
        if self.session.slow().is_settled() {
            if let Some(mut handle) = self.canonical_watcher.take() {
                handle.release();
            }
        }

        if let Some(result) = self.session.evaluate() {
            info!(
                race = %event.race,
                fast_ms = result.fast_elapsed_ms,
                slow_ms = result.slow_elapsed_ms,
                delta_ms = result.delta_ms,
                "[RACE] {}",
                result.summary()
            );
            self.last_progress = self.interpolator.settled(&self.session);
            self.pending.push(TrackerEvent::Decided(result));
            self.release_all();
        }
        true
    }
}

impl Drop for RaceTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}

// =============================================================================
// TESTS
// =============================================================================
