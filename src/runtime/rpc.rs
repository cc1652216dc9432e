//! JSON-RPC client over HTTP
//!
//! Blocking client used by the poll paths: fast receipt lookups against the
//! preconfirmation endpoint and the canonical wait-for-receipt loop against
//! the regular endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::core::constants::CANONICAL_POLL_INTERVAL;
use crate::core::io_traits::{
    CancelToken, CanonicalRpc, CanonicalWaiter, FastFeedLookup, Replacement, ReplacementReason,
    RpcError,
};
use crate::core::protocol::{
    parse_hex_u64, to_hex, BlockHeader, BlockRef, BlockWithTransactions, RpcRequest, RpcResponse,
    TransactionInfo, TxReceipt,
};
use crate::core::types::TxHash;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// RPC CLIENT
// =============================================================================

/// Blocking JSON-RPC 2.0 client bound to one endpoint
#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RpcError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(RpcError::Transport("rpc endpoint must not be empty".to_string()));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    /// Raw call; a `null` result comes back as `Value::Null`
    pub fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RpcError::Status(response.status().as_u16()));
        }
        let body: RpcResponse = response
            .json()
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    fn call_opt<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, RpcError> {
        let value = self.call(method, params)?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }

    pub fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
        self.call_opt("eth_getTransactionReceipt", json!([tx.as_str()]))
    }

    pub fn transaction(&self, tx: &TxHash) -> Result<Option<TransactionInfo>, RpcError> {
        self.call_opt("eth_getTransactionByHash", json!([tx.as_str()]))
    }

    pub fn block_header(&self, block: &BlockRef) -> Result<Option<BlockHeader>, RpcError> {
        match block {
            BlockRef::Hash(hash) => self.call_opt("eth_getBlockByHash", json!([hash, false])),
            BlockRef::Number(n) => self.call_opt("eth_getBlockByNumber", json!([to_hex(*n), false])),
        }
    }

    pub fn latest_block_with_transactions(&self) -> Result<Option<BlockWithTransactions>, RpcError> {
        self.call_opt("eth_getBlockByNumber", json!(["latest", true]))
    }

    /// Number of transactions mined from `address` (its next nonce)
    pub fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let value = self.call("eth_getTransactionCount", json!([address, "latest"]))?;
        value
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| RpcError::Decode(format!("eth_getTransactionCount: {value}")))
    }
}

impl FastFeedLookup for RpcClient {
    fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
        RpcClient::transaction_receipt(self, tx)
    }

    fn block_timestamp(&self, block: &BlockRef) -> Result<u64, RpcError> {
        let header = self
            .block_header(block)?
            .ok_or_else(|| RpcError::NotFound(format!("block {block:?}")))?;
        header
            .timestamp_secs()
            .ok_or_else(|| RpcError::Decode(format!("block timestamp {}", header.timestamp)))
    }
}

impl CanonicalRpc for RpcClient {
    fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, RpcError> {
        RpcClient::transaction_receipt(self, tx)
    }

    fn transaction(&self, tx: &TxHash) -> Result<Option<TransactionInfo>, RpcError> {
        RpcClient::transaction(self, tx)
    }

    fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        RpcClient::transaction_count(self, address)
    }

    fn latest_block_with_transactions(&self) -> Result<Option<BlockWithTransactions>, RpcError> {
        RpcClient::latest_block_with_transactions(self)
    }
}

// =============================================================================
// CANONICAL RECEIPT WAITER
// =============================================================================

/// Polls the regular endpoint until the transaction, or whatever replaced
/// it, has a receipt
pub struct ReceiptWaiter {
    rpc: Arc<dyn CanonicalRpc>,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(rpc: Arc<dyn CanonicalRpc>) -> Self {
        Self {
            rpc,
            poll_interval: CANONICAL_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Look for a mined transaction that took `original`'s nonce
    fn find_replacement(&self, original: &TransactionInfo) -> Result<Option<Replacement>, RpcError> {
        let Some(nonce) = original.nonce_u64() else {
            return Ok(None);
        };
        // Nothing mined at this nonce yet
        if self.rpc.transaction_count(&original.from)? <= nonce {
            return Ok(None);
        }
        let Some(block) = self.rpc.latest_block_with_transactions()? else {
            return Ok(None);
        };
        let found = block.transactions.into_iter().find(|candidate| {
            candidate.from.eq_ignore_ascii_case(&original.from)
                && candidate.nonce_u64() == Some(nonce)
                && !candidate.hash.eq_ignore_ascii_case(&original.hash)
        });
        Ok(found.map(|candidate| Replacement {
            original: TxHash::new(original.hash.clone()),
            reason: replacement_reason(original, &candidate),
            replacement: TxHash::new(candidate.hash),
        }))
    }
}

fn replacement_reason(original: &TransactionInfo, candidate: &TransactionInfo) -> ReplacementReason {
    let same_call = candidate.to == original.to
        && candidate.value == original.value
        && candidate.input == original.input;
    if same_call {
        return ReplacementReason::Repriced;
    }
    let self_transfer = candidate
        .to
        .as_deref()
        .is_some_and(|to| to.eq_ignore_ascii_case(&candidate.from));
    let zero_value = candidate
        .value
        .as_deref()
        .and_then(parse_hex_u64)
        .unwrap_or(0)
        == 0;
    let empty_input = candidate.input.as_deref().map_or(true, |i| i == "0x");
    if self_transfer && zero_value && empty_input {
        ReplacementReason::Cancelled
    } else {
        ReplacementReason::Replaced
    }
}

impl CanonicalWaiter for ReceiptWaiter {
    fn wait_for_receipt(
        &self,
        tx: &TxHash,
        timeout: Duration,
        cancel: &CancelToken,
        on_replaced: &mut dyn FnMut(Replacement),
    ) -> Result<TxReceipt, RpcError> {
        let deadline = Instant::now() + timeout;
        let mut current = tx.clone();
        let mut known: Option<TransactionInfo> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(RpcError::Cancelled);
            }

            match self.rpc.transaction_receipt(&current) {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => warn!(tx = %current, error = %e, "[CANON] Receipt lookup failed"),
            }

            match (&known, self.rpc.transaction(&current)) {
                (None, Ok(Some(info))) => known = Some(info),
                // Transaction vanished from the pool: it may have been replaced
                (Some(original), Ok(None)) => match self.find_replacement(original) {
                    Ok(Some(replacement)) => {
                        info!(
                            original = %replacement.original,
                            replacement = %replacement.replacement,
                            reason = %replacement.reason,
                            "[CANON] Transaction replaced"
                        );
                        current = replacement.replacement.clone();
                        known = None;
                        on_replaced(replacement);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "[CANON] Replacement check failed"),
                },
                (_, Err(e)) => debug!(error = %e, "[CANON] Transaction lookup failed"),
                _ => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RpcError::Timeout(timeout));
            }
            if !cancel.sleep(self.poll_interval.min(remaining)) {
                return Err(RpcError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io_traits::mocks::MockCanonicalRpc;
    use std::thread;

    fn tx_info(hash: &str, to: &str, value: &str, input: &str) -> TransactionInfo {
        TransactionInfo {
            hash: hash.to_string(),
            from: "0xF00".to_string(),
            nonce: "0x7".to_string(),
            to: Some(to.to_string()),
            value: Some(value.to_string()),
            input: Some(input.to_string()),
        }
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        assert!(matches!(RpcClient::new("  "), Err(RpcError::Transport(_))));
    }

    #[test]
    fn test_replacement_reason_repriced() {
        let original = tx_info("0x1", "0xbeef", "0x10", "0xabcd");
        let candidate = tx_info("0x2", "0xbeef", "0x10", "0xabcd");
        assert_eq!(
            replacement_reason(&original, &candidate),
            ReplacementReason::Repriced
        );
    }

    #[test]
    fn test_replacement_reason_cancelled() {
        let original = tx_info("0x1", "0xbeef", "0x10", "0xabcd");
        let candidate = tx_info("0x2", "0xf00", "0x0", "0x");
        assert_eq!(
            replacement_reason(&original, &candidate),
            ReplacementReason::Cancelled
        );
    }

    #[test]
    fn test_replacement_reason_replaced() {
        let original = tx_info("0x1", "0xbeef", "0x10", "0xabcd");
        let candidate = tx_info("0x2", "0xcafe", "0x10", "0xabcd");
        assert_eq!(
            replacement_reason(&original, &candidate),
            ReplacementReason::Replaced
        );
    }

    // -------------------------------------------------------------------------
    // Receipt waiter
    // -------------------------------------------------------------------------

    fn waiter(rpc: &Arc<MockCanonicalRpc>) -> ReceiptWaiter {
        ReceiptWaiter::new(rpc.clone()).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_waiter_cancelled_before_first_lookup() {
        let rpc = Arc::new(MockCanonicalRpc::new());
        let (guard, token) = CancelToken::pair();
        drop(guard);
        let result = waiter(&rpc).wait_for_receipt(
            &TxHash::new("0xabc"),
            Duration::from_secs(1),
            &token,
            &mut |_| {},
        );
        assert_eq!(result, Err(RpcError::Cancelled));
        assert_eq!(rpc.receipt_call_count(), 0);
    }

    #[test]
    fn test_waiter_returns_mined_receipt() {
        let rpc = Arc::new(MockCanonicalRpc::new());
        let original = tx_info("0x1", "0xbeef", "0x10", "0xabcd");
        rpc.add_pending(original.clone());
        let miner = {
            let rpc = rpc.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                rpc.mine(original, "0xcanon");
            })
        };

        let (_guard, token) = CancelToken::pair();
        let mut replaced = Vec::new();
        let result = waiter(&rpc).wait_for_receipt(
            &TxHash::new("0x1"),
            Duration::from_secs(2),
            &token,
            &mut |r| replaced.push(r),
        );
        miner.join().unwrap();
        assert_eq!(result.unwrap().block_hash.as_deref(), Some("0xcanon"));
        assert!(replaced.is_empty());
    }

    #[test]
    fn test_waiter_follows_replacement_until_mined() {
        let rpc = Arc::new(MockCanonicalRpc::new());
        rpc.add_pending(tx_info("0x1", "0xbeef", "0x10", "0xabcd"));
        // Same call at a higher fee, mined under the original's nonce
        let miner = {
            let rpc = rpc.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                rpc.mine(tx_info("0x2", "0xbeef", "0x10", "0xabcd"), "0xcanon");
            })
        };

        let (_guard, token) = CancelToken::pair();
        let mut replaced = Vec::new();
        let result = waiter(&rpc).wait_for_receipt(
            &TxHash::new("0x1"),
            Duration::from_secs(2),
            &token,
            &mut |r| replaced.push(r),
        );
        miner.join().unwrap();

        assert_eq!(result.unwrap().transaction_hash, "0x2");
        assert_eq!(
            replaced,
            vec![Replacement {
                original: TxHash::new("0x1"),
                replacement: TxHash::new("0x2"),
                reason: ReplacementReason::Repriced,
            }]
        );
    }

    #[test]
    fn test_waiter_times_out_while_pending() {
        let rpc = Arc::new(MockCanonicalRpc::new());
        rpc.add_pending(tx_info("0x1", "0xbeef", "0x10", "0xabcd"));

        let (_guard, token) = CancelToken::pair();
        let timeout = Duration::from_millis(150);
        let started = Instant::now();
        let result = waiter(&rpc).wait_for_receipt(&TxHash::new("0x1"), timeout, &token, &mut |_| {});
        assert_eq!(result, Err(RpcError::Timeout(timeout)));
        assert!(started.elapsed() >= timeout);
        assert!(rpc.receipt_call_count() >= 2);
    }

    #[test]
    fn test_waiter_dropped_tx_is_not_a_replacement() {
        let rpc = Arc::new(MockCanonicalRpc::new());
        rpc.add_pending(tx_info("0x1", "0xbeef", "0x10", "0xabcd"));
        let dropper = {
            let rpc = rpc.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                rpc.drop_pending("0x1");
            })
        };

        // Nonce never consumed: keep waiting until the deadline
        let (_guard, token) = CancelToken::pair();
        let mut replaced = Vec::new();
        let timeout = Duration::from_millis(150);
        let result = waiter(&rpc).wait_for_receipt(
            &TxHash::new("0x1"),
            timeout,
            &token,
            &mut |r| replaced.push(r),
        );
        dropper.join().unwrap();
        assert_eq!(result, Err(RpcError::Timeout(timeout)));
        assert!(replaced.is_empty());
    }
}
