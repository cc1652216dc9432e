//! Block cadence watcher
//!
//! Keeps one `newHeads` subscription open per feed and counts what arrives,
//! reconnecting until stopped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::cadence::{CadenceMonitor, Feed};
use crate::core::constants::{PUSH_RECONNECT_INITIAL, PUSH_RECONNECT_MAX, SOCKET_READ_TIMEOUT};
use crate::core::io_traits::{CancelGuard, CancelToken, FeedConnector, FeedSubscription};
use crate::core::protocol::{BlockHeader, SubscriptionNotification};

use super::config::EndpointSettings;
use super::websocket::WsFeed;

/// Background counters for the regular and Flashblocks head streams
pub struct CadenceWatcher {
    monitor: Arc<Mutex<CadenceMonitor>>,
    cancel: Option<CancelGuard>,
    threads: Vec<JoinHandle<()>>,
}

impl CadenceWatcher {
    pub fn spawn(regular: Arc<dyn FeedConnector>, flash: Arc<dyn FeedConnector>) -> Self {
        let monitor = Arc::new(Mutex::new(CadenceMonitor::new()));
        let (guard, token) = CancelToken::pair();

        let mut threads = Vec::new();
        for (feed, connector) in [(Feed::Regular, regular), (Feed::Flashblocks, flash)] {
            let monitor = Arc::clone(&monitor);
            let token = token.clone();
            let spawned = thread::Builder::new()
                .name(format!("heads-{feed:?}").to_lowercase())
                .spawn(move || run_feed(feed, connector.as_ref(), &monitor, &token));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => warn!(?feed, error = %e, "[HEADS] Failed to spawn feed thread"),
            }
        }

        Self {
            monitor,
            cancel: Some(guard),
            threads,
        }
    }

    /// Watch the configured WebSocket endpoints
    pub fn from_endpoints(endpoints: &EndpointSettings) -> Self {
        Self::spawn(
            Arc::new(WsFeed::new_heads(&endpoints.regular_ws)),
            Arc::new(WsFeed::new_heads(&endpoints.flashblock_ws)),
        )
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> CadenceMonitor {
        self.monitor.lock().clone()
    }

    /// Stop both feeds and wait for their threads
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for CadenceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_feed(
    feed: Feed,
    connector: &dyn FeedConnector,
    monitor: &Mutex<CadenceMonitor>,
    cancel: &CancelToken,
) {
    let mut backoff = PUSH_RECONNECT_INITIAL;

    while !cancel.is_cancelled() {
        match connector.subscribe() {
            Ok(mut subscription) => {
                info!(?feed, "[HEADS] Subscribed");
                backoff = PUSH_RECONNECT_INITIAL;
                count_frames(feed, subscription.as_mut(), monitor, cancel);
                subscription.close();
            }
            Err(e) => warn!(?feed, error = %e, "[HEADS] Connect failed"),
        }

        if !cancel.sleep(backoff) {
            break;
        }
        backoff = (backoff * 2).min(PUSH_RECONNECT_MAX);
    }
    debug!(?feed, "[HEADS] Feed stopped");
}

fn count_frames(
    feed: Feed,
    subscription: &mut dyn FeedSubscription,
    monitor: &Mutex<CadenceMonitor>,
    cancel: &CancelToken,
) {
    while !cancel.is_cancelled() {
        match subscription.next_frame(SOCKET_READ_TIMEOUT) {
            Ok(Some(text)) => {
                let head = parse_head(&text);
                monitor.lock().record(feed, head.as_ref());
            }
            Ok(None) => {}
            Err(e) => {
                warn!(?feed, error = %e, "[HEADS] Subscription dropped");
                return;
            }
        }
    }
}

/// Header carried by an `eth_subscription` notification, if any
fn parse_head(text: &str) -> Option<BlockHeader> {
    let note: SubscriptionNotification = serde_json::from_str(text).ok()?;
    if note.method != "eth_subscription" {
        return None;
    }
    serde_json::from_value(note.params.result).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io_traits::mocks::{FrameStep, MockConnector};
    use std::time::{Duration, Instant};

    fn head_note(number: u64, ts: u64) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":"0x1","result":{{"number":"{number:#x}","timestamp":"{ts:#x}"}}}}}}"#
        )
    }

    #[test]
    fn test_parse_head() {
        let head = parse_head(&head_note(16, 100)).unwrap();
        assert_eq!(head.number_u64(), Some(16));
        assert!(parse_head(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#).is_none());
        assert!(parse_head("garbage").is_none());
    }

    #[test]
    fn test_from_endpoints_stops_while_unreachable() {
        // Nothing listens on the discard port
        let endpoints = EndpointSettings {
            regular_ws: "ws://127.0.0.1:9".to_string(),
            flashblock_ws: "ws://127.0.0.1:9".to_string(),
            ..EndpointSettings::default()
        };
        let mut watcher = CadenceWatcher::from_endpoints(&endpoints);
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        watcher.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        let snap = watcher.snapshot();
        assert_eq!(snap.stats(Feed::Regular).messages, 0);
        assert_eq!(snap.stats(Feed::Flashblocks).messages, 0);
    }

    #[test]
    fn test_counts_both_feeds() {
        let regular = Arc::new(MockConnector::new());
        regular.queue_session(vec![
            // Subscription ack counts as a message too
            FrameStep::Frame(Duration::from_millis(5), r#"{"jsonrpc":"2.0","id":1,"result":"0xs"}"#.to_string()),
            FrameStep::Frame(Duration::from_millis(5), head_note(10, 1_000)),
        ]);
        let flash = Arc::new(MockConnector::new());
        let mut steps = Vec::new();
        for i in 0..8 {
            steps.push(FrameStep::Frame(Duration::from_millis(2), head_note(10 + i / 4, 1_000)));
        }
        flash.queue_session(steps);

        let mut watcher = CadenceWatcher::spawn(regular, flash);
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let snap = watcher.snapshot();
            if snap.stats(Feed::Regular).messages == 2 && snap.stats(Feed::Flashblocks).messages == 8 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        watcher.stop();

        let snap = watcher.snapshot();
        assert_eq!(snap.stats(Feed::Regular).messages, 2);
        assert_eq!(snap.stats(Feed::Regular).history.len(), 1);
        assert_eq!(snap.stats(Feed::Flashblocks).messages, 8);
        assert_eq!(snap.stats(Feed::Flashblocks).history.len(), 5);
        assert_eq!(snap.ratio(), Some(4.0));
    }
}
