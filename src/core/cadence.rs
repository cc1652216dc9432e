//! Block cadence monitor
//!
//! Counts new-head notifications on the regular and Flashblocks feeds and
//! keeps a short history of recent blocks per feed, for the live speed
//! comparison shown next to the race.

use std::collections::VecDeque;

use crate::core::constants::{BLOCK_HISTORY_LEN, CADENCE_BASE_WIDTH, CADENCE_MAX_WIDTH};
use crate::core::protocol::BlockHeader;

/// Which block stream a head came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Regular,
    Flashblocks,
}

/// A block as shown in the history strip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSeen {
    pub number: u64,
    /// Block time in seconds
    pub timestamp: u64,
}

/// Per-feed message counter and history
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    pub messages: u64,
    pub history: VecDeque<BlockSeen>,
}

impl FeedStats {
    fn record(&mut self, block: Option<BlockSeen>) {
        self.messages += 1;
        if let Some(block) = block {
            self.history.push_front(block);
            self.history.truncate(BLOCK_HISTORY_LEN);
        }
    }
}

/// Bar widths of the speed comparison (percent)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonBars {
    pub regular_width: f64,
    pub flash_width: f64,
}

/// Live counters for both feeds
#[derive(Debug, Clone, Default)]
pub struct CadenceMonitor {
    regular: FeedStats,
    flash: FeedStats,
}

impl CadenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message; well-formed heads also enter the history
    ///
    /// Every message counts, including ones without a parsable header.
    pub fn record(&mut self, feed: Feed, head: Option<&BlockHeader>) {
        let seen = head.and_then(|h| {
            Some(BlockSeen {
                number: h.number_u64()?,
                timestamp: h.timestamp_secs()?,
            })
        });
        match feed {
            Feed::Regular => self.regular.record(seen),
            Feed::Flashblocks => self.flash.record(seen),
        }
    }

    pub fn stats(&self, feed: Feed) -> &FeedStats {
        match feed {
            Feed::Regular => &self.regular,
            Feed::Flashblocks => &self.flash,
        }
    }

    /// Flashblocks messages per regular message, rounded to one decimal
    ///
    /// `None` until both feeds have delivered something.
    pub fn ratio(&self) -> Option<f64> {
        if self.regular.messages == 0 || self.flash.messages == 0 {
            return None;
        }
        let raw = self.flash.messages as f64 / self.regular.messages as f64;
        Some((raw * 10.0).round() / 10.0)
    }

    pub fn bars(&self) -> Option<ComparisonBars> {
        let ratio = self.ratio()?;
        Some(ComparisonBars {
            regular_width: CADENCE_BASE_WIDTH,
            flash_width: (CADENCE_BASE_WIDTH * ratio).min(CADENCE_MAX_WIDTH),
        })
    }

    /// Scale for the message-count bars: at least 100, else 20% above the larger count
    pub fn max_count(&self) -> f64 {
        let larger = self.regular.messages.max(self.flash.messages) as f64;
        (larger * 1.2).max(100.0)
    }
}
