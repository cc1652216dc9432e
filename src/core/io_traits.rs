//! I/O traits for the confirmation watchers
//!
//! These traits abstract the chain client (receipt lookups, the Flashblocks
//! push stream, the canonical receipt wait) so the watchers and the tracker
//! can be tested on any machine with scripted mocks.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use thiserror::Error;

use crate::core::protocol::{BlockRef, BlockWithTransactions, TransactionInfo, TxReceipt};
use crate::core::types::TxHash;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure of a single JSON-RPC exchange
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// Failure of a push subscription
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("subscription closed by server")]
    Closed,
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Owner side of a cancellation signal; dropping it cancels every token
#[derive(Debug)]
pub struct CancelGuard {
    _signal: Sender<()>,
}

impl CancelGuard {
    /// Cancel explicitly (dropping has the same effect)
    pub fn cancel(self) {
        drop(self);
    }
}

/// Worker side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken(Receiver<()>);

impl CancelToken {
    pub fn pair() -> (CancelGuard, CancelToken) {
        let (tx, rx) = bounded(1);
        (CancelGuard { _signal: tx }, CancelToken(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        !matches!(self.0.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `duration` unless cancelled first. Returns false on cancel.
    pub fn sleep(&self, duration: Duration) -> bool {
        select! {
            recv(self.0) -> _ => false,
            default(duration) => true,
        }
    }
}

// =============================================================================
// REPLACEMENT
// =============================================================================

/// Why the waited transaction was superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementReason {
    /// Same call, higher fee
    Repriced,
    /// Different call data or recipient
    Replaced,
    /// Zero-value self transfer with empty data
    Cancelled,
}

impl fmt::Display for ReplacementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementReason::Repriced => write!(f, "repriced"),
            ReplacementReason::Replaced => write!(f, "replaced"),
            ReplacementReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Notification that another transaction took the waited one's nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub original: TxHash,
    pub replacement: TxHash,
    pub reason: ReplacementReason,
}

// =============================================================================
// I/O TRAITS
// =============================================================================

/// Receipt and block lookups on the preconfirmation RPC
pub trait FastFeedLookup: Send + Sync {
    /// Receipt of the transaction, `None` while not yet included
    fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, RpcError>;

    /// Timestamp (seconds) of the referenced block
    fn block_timestamp(&self, block: &BlockRef) -> Result<u64, RpcError>;
}

/// An open push subscription
pub trait FeedSubscription: Send {
    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<String>, FeedError>;

    /// Close the subscription; calling it twice is harmless
    fn close(&mut self);
}

/// Opens push subscriptions to the Flashblocks stream
pub trait FeedConnector: Send + Sync {
    fn subscribe(&self) -> Result<Box<dyn FeedSubscription>, FeedError>;
}

/// Chain queries behind the canonical receipt wait
pub trait CanonicalRpc: Send + Sync {
    /// Receipt of the transaction, `None` while not mined
    fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, RpcError>;

    /// The transaction itself, `None` once it is unknown to the node
    fn transaction(&self, tx: &TxHash) -> Result<Option<TransactionInfo>, RpcError>;

    /// Transactions mined from `address` so far (its next nonce)
    fn transaction_count(&self, address: &str) -> Result<u64, RpcError>;

    fn latest_block_with_transactions(&self) -> Result<Option<BlockWithTransactions>, RpcError>;
}

/// Canonical wait-for-receipt primitive
pub trait CanonicalWaiter: Send + Sync {
    /// Block until the transaction (or its replacement) is mined, the timeout
    /// expires or `cancel` fires.
    fn wait_for_receipt(
        &self,
        tx: &TxHash,
        timeout: Duration,
        cancel: &CancelToken,
        on_replaced: &mut dyn FnMut(Replacement),
    ) -> Result<TxReceipt, RpcError>;
}

// =============================================================================
// MOCK IMPLEMENTATIONS FOR TESTING
// =============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::time::Instant;

    pub fn receipt(tx: &str, block_hash: &str) -> TxReceipt {
        TxReceipt {
            transaction_hash: tx.to_string(),
            block_hash: Some(block_hash.to_string()),
            block_number: Some("0x1".to_string()),
            status: Some("0x1".to_string()),
        }
    }

    /// Scripted receipt lookups
    ///
    /// Each call pops the next scripted answer; an empty script answers
    /// "not yet included".
    #[derive(Default)]
    pub struct MockFastLookup {
        pub receipts: Mutex<VecDeque<Result<Option<TxReceipt>, RpcError>>>,
        pub block_times: Mutex<HashMap<String, u64>>,
        pub receipt_calls: Mutex<u32>,
    }

    impl MockFastLookup {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_receipt(&self, answer: Result<Option<TxReceipt>, RpcError>) {
            self.receipts.lock().push_back(answer);
        }

        pub fn set_block_time(&self, block_hash: &str, secs: u64) {
            self.block_times.lock().insert(block_hash.to_string(), secs);
        }

        pub fn receipt_call_count(&self) -> u32 {
            *self.receipt_calls.lock()
        }
    }

    impl FastFeedLookup for MockFastLookup {
        fn transaction_receipt(&self, _tx: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
            *self.receipt_calls.lock() += 1;
            self.receipts.lock().pop_front().unwrap_or(Ok(None))
        }

        fn block_timestamp(&self, block: &BlockRef) -> Result<u64, RpcError> {
            let key = match block {
                BlockRef::Hash(h) => h.clone(),
                BlockRef::Number(n) => format!("{n}"),
            };
            self.block_times
                .lock()
                .get(&key)
                .copied()
                .ok_or(RpcError::NotFound(key))
        }
    }

    /// In-memory chain for the canonical waiter
    ///
    /// Transactions sit in the pool until `mine` moves them into the latest
    /// block, which also consumes the sender's nonce.
    #[derive(Default)]
    pub struct MockCanonicalRpc {
        pub pool: Mutex<HashMap<String, TransactionInfo>>,
        pub receipts: Mutex<HashMap<String, TxReceipt>>,
        pub nonces: Mutex<HashMap<String, u64>>,
        pub latest: Mutex<Option<BlockWithTransactions>>,
        pub receipt_calls: Mutex<u32>,
    }

    impl MockCanonicalRpc {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_pending(&self, info: TransactionInfo) {
            self.pool.lock().insert(info.hash.to_ascii_lowercase(), info);
        }

        /// Forget a pending transaction without mining anything
        pub fn drop_pending(&self, hash: &str) {
            self.pool.lock().remove(&hash.to_ascii_lowercase());
        }

        /// Mine `info`; any pending transaction with the same sender and nonce is evicted
        pub fn mine(&self, info: TransactionInfo, block_hash: &str) {
            let from = info.from.to_ascii_lowercase();
            self.pool
                .lock()
                .retain(|_, p| !(p.from.eq_ignore_ascii_case(&from) && p.nonce == info.nonce));
            self.receipts
                .lock()
                .insert(info.hash.to_ascii_lowercase(), receipt(&info.hash, block_hash));
            if let Some(nonce) = info.nonce_u64() {
                self.nonces.lock().insert(from, nonce + 1);
            }
            *self.latest.lock() = Some(BlockWithTransactions {
                number: "0x2".to_string(),
                transactions: vec![info],
            });
        }

        pub fn receipt_call_count(&self) -> u32 {
            *self.receipt_calls.lock()
        }
    }

    impl CanonicalRpc for MockCanonicalRpc {
        fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
            *self.receipt_calls.lock() += 1;
            Ok(self.receipts.lock().get(&tx.as_str().to_ascii_lowercase()).cloned())
        }

        fn transaction(&self, tx: &TxHash) -> Result<Option<TransactionInfo>, RpcError> {
            Ok(self.pool.lock().get(&tx.as_str().to_ascii_lowercase()).cloned())
        }

        fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
            Ok(self
                .nonces
                .lock()
                .get(&address.to_ascii_lowercase())
                .copied()
                .unwrap_or(0))
        }

        fn latest_block_with_transactions(&self) -> Result<Option<BlockWithTransactions>, RpcError> {
            Ok(self.latest.lock().clone())
        }
    }

    /// One step of a scripted subscription
    #[derive(Debug, Clone)]
    pub enum FrameStep {
        /// Deliver a frame after the delay
        Frame(Duration, String),
        /// Fail the read after the delay
        Fail(Duration, FeedError),
    }

    /// Scripted subscription; stays silent once the script runs out
    pub struct MockSubscription {
        steps: VecDeque<FrameStep>,
        closed: Arc<Mutex<u32>>,
        pending_since: Instant,
    }

    impl FeedSubscription for MockSubscription {
        fn next_frame(&mut self, timeout: Duration) -> Result<Option<String>, FeedError> {
            let due = match self.steps.front() {
                Some(FrameStep::Frame(d, _)) | Some(FrameStep::Fail(d, _)) => *d,
                None => {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
            };
            let waited = self.pending_since.elapsed();
            if waited + timeout < due {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(due.saturating_sub(waited));
            self.pending_since = Instant::now();
            match self.steps.pop_front() {
                Some(FrameStep::Frame(_, text)) => Ok(Some(text)),
                Some(FrameStep::Fail(_, err)) => Err(err),
                None => Ok(None),
            }
        }

        fn close(&mut self) {
            *self.closed.lock() += 1;
        }
    }

    /// Hands out scripted subscriptions, one script per `subscribe` call
    #[derive(Default)]
    pub struct MockConnector {
        pub scripts: Mutex<VecDeque<Result<Vec<FrameStep>, FeedError>>>,
        pub subscribe_calls: Mutex<u32>,
        pub closed: Arc<Mutex<u32>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_session(&self, steps: Vec<FrameStep>) {
            self.scripts.lock().push_back(Ok(steps));
        }

        pub fn queue_connect_error(&self, err: FeedError) {
            self.scripts.lock().push_back(Err(err));
        }

        pub fn subscribe_count(&self) -> u32 {
            *self.subscribe_calls.lock()
        }

        pub fn close_count(&self) -> u32 {
            *self.closed.lock()
        }
    }

    impl FeedConnector for MockConnector {
        fn subscribe(&self) -> Result<Box<dyn FeedSubscription>, FeedError> {
            *self.subscribe_calls.lock() += 1;
            let steps = self.scripts.lock().pop_front().unwrap_or(Ok(Vec::new()))?;
            Ok(Box::new(MockSubscription {
                steps: steps.into(),
                closed: Arc::clone(&self.closed),
                pending_since: Instant::now(),
            }))
        }
    }

    /// Scripted canonical wait
    #[derive(Debug, Clone)]
    pub enum WaitScript {
        /// Receipt after the delay
        ConfirmAfter(Duration),
        /// Replacement notification, then the replacement's receipt
        ReplaceThenConfirm {
            replace_after: Duration,
            replacement: TxHash,
            confirm_after: Duration,
        },
        /// Error after the delay
        FailAfter(Duration, RpcError),
        /// Never answers; times out or gets cancelled
        Hang,
    }

    pub struct MockWaiter {
        pub script: Mutex<WaitScript>,
        pub calls: Mutex<u32>,
    }

    impl MockWaiter {
        pub fn new(script: WaitScript) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn sleep_within(
            cancel: &CancelToken,
            delay: Duration,
            deadline: Instant,
            timeout: Duration,
        ) -> Result<(), RpcError> {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay > remaining {
                return if cancel.sleep(remaining) {
                    Err(RpcError::Timeout(timeout))
                } else {
                    Err(RpcError::Cancelled)
                };
            }
            if cancel.sleep(delay) {
                Ok(())
            } else {
                Err(RpcError::Cancelled)
            }
        }
    }

    impl CanonicalWaiter for MockWaiter {
        fn wait_for_receipt(
            &self,
            tx: &TxHash,
            timeout: Duration,
            cancel: &CancelToken,
            on_replaced: &mut dyn FnMut(Replacement),
        ) -> Result<TxReceipt, RpcError> {
            *self.calls.lock() += 1;
            let deadline = Instant::now() + timeout;
            let script = self.script.lock().clone();
            match script {
                WaitScript::ConfirmAfter(delay) => {
                    Self::sleep_within(cancel, delay, deadline, timeout)?;
                    Ok(receipt(tx.as_str(), "0xcanon"))
                }
                WaitScript::ReplaceThenConfirm {
                    replace_after,
                    replacement,
                    confirm_after,
                } => {
                    Self::sleep_within(cancel, replace_after, deadline, timeout)?;
                    on_replaced(Replacement {
                        original: tx.clone(),
                        replacement: replacement.clone(),
                        reason: ReplacementReason::Repriced,
                    });
                    Self::sleep_within(cancel, confirm_after, deadline, timeout)?;
                    Ok(receipt(replacement.as_str(), "0xcanon"))
                }
                WaitScript::FailAfter(delay, err) => {
                    Self::sleep_within(cancel, delay, deadline, timeout)?;
                    Err(err)
                }
                WaitScript::Hang => {
                    if cancel.sleep(timeout) {
                        Err(RpcError::Timeout(timeout))
                    } else {
                        Err(RpcError::Cancelled)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_drop_cancels() {
        let (guard, token) = CancelToken::pair();
        assert!(!token.is_cancelled());
        drop(guard);
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_secs(5)));
    }

    #[test]
    fn test_cancel_token_sleep_completes() {
        let (_guard, token) = CancelToken::pair();
        assert!(token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_replacement_reason_display() {
        assert_eq!(ReplacementReason::Repriced.to_string(), "repriced");
        assert_eq!(ReplacementReason::Cancelled.to_string(), "cancelled");
    }
}
