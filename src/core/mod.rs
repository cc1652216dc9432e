//! Core module - platform-independent race logic

pub mod cadence;
pub mod constants;
pub mod format;
pub mod interpolator;
pub mod io_traits;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod traits;
pub mod types;

pub use format::{format_ratio, format_time};
pub use interpolator::{Interpolator, RaceProgress};
pub use io_traits::{CanonicalWaiter, FastFeedLookup, FeedConnector, FeedSubscription};
pub use protocol::FlashblockMessage;
pub use session::{RaceSession, WatcherEvent, WatcherEventKind};
pub use traits::{Clock, SystemClock};
pub use types::{FastConfirmation, RaceId, RacePhase, RaceResult, SlowConfirmation, TxHash};
