//! Runtime module - chain clients, watcher threads and the race driver
//!
//! This module contains everything that touches the network or spawns threads:
//! - RaceTracker: owns the session and drives one race
//! - Confirmation watchers (fast push/poll hedge, canonical wait)
//! - JSON-RPC and WebSocket clients
//! - Block cadence watcher
//! - Configuration loading and logging setup

pub mod config;
pub mod heads;
pub mod logging;
pub mod rpc;
pub mod tracker;
pub mod watchers;
pub mod websocket;

pub use config::Config;
pub use heads::CadenceWatcher;
pub use tracker::{ChainClients, RaceTracker, TrackerEvent};
pub use watchers::{WatcherHandle, WatcherTimings};
