// Flashblocks confirmation race

pub mod core;
pub mod runtime;

pub use crate::core::{RaceProgress, RaceResult, TxHash};
pub use crate::runtime::{Config, RaceTracker, TrackerEvent};
