//! Wire protocol types
//!
//! JSON shapes exchanged with the chain: Flashblocks stream frames, JSON-RPC
//! envelopes and the receipt/block/transaction objects the watchers read.
//! These types are platform-independent and testable without a network.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{Millis, TxHash};

/// Parse a 0x-prefixed hex quantity (`"0x1a"`); bare hex is accepted too
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Block seconds to millis; `None` when the value does not fit
pub fn secs_to_millis(secs: u64) -> Option<Millis> {
    Millis::try_from(secs).ok()?.checked_mul(1000)
}

/// Encode a quantity as 0x-prefixed hex
pub fn to_hex(value: u64) -> String {
    format!("{:#x}", value)
}

// =============================================================================
// FLASHBLOCKS STREAM
// =============================================================================

/// One frame of the Flashblocks WebSocket stream
///
/// Only the fields the race needs are modelled; everything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FlashblockMessage {
    #[serde(default)]
    pub metadata: Option<FlashblockMetadata>,
    #[serde(default)]
    pub diff: Option<FlashblockDiff>,
}

/// Per-flashblock metadata: receipts keyed by transaction hash
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FlashblockMetadata {
    #[serde(default)]
    pub receipts: HashMap<String, Value>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// State diff of the flashblock, carries the authoritative block time
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FlashblockDiff {
    /// Hex-encoded seconds
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl FlashblockMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Whether the receipt map lists the transaction
    pub fn contains_tx(&self, tx: &TxHash) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(|m| m.receipts.keys().any(|k| tx.matches(k)))
    }

    /// Embedded block time in milliseconds, if present and well-formed
    pub fn block_timestamp_ms(&self) -> Option<Millis> {
        let hex = self.diff.as_ref()?.timestamp.as_deref()?;
        secs_to_millis(parse_hex_u64(hex)?)
    }
}

// =============================================================================
// JSON-RPC ENVELOPES
// =============================================================================

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// `eth_subscription` push notification
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionNotification {
    pub method: String,
    pub params: SubscriptionParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    pub result: Value,
}

// =============================================================================
// CHAIN OBJECTS
// =============================================================================

/// Transaction receipt (subset)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TxReceipt {
    /// Where to look up the containing block
    pub fn block_ref(&self) -> Option<BlockRef> {
        if let Some(hash) = &self.block_hash {
            return Some(BlockRef::Hash(hash.clone()));
        }
        self.block_number
            .as_deref()
            .and_then(parse_hex_u64)
            .map(BlockRef::Number)
    }
}

/// Reference to a block, by hash or by number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Hash(String),
    Number(u64),
}

/// Block header (subset), as returned by `eth_getBlockBy*` and `newHeads`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockHeader {
    pub number: String,
    pub timestamp: String,
    #[serde(default)]
    pub hash: Option<String>,
}

impl BlockHeader {
    pub fn number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.number)
    }

    pub fn timestamp_secs(&self) -> Option<u64> {
        parse_hex_u64(&self.timestamp)
    }
}

/// Transaction (subset), as returned by `eth_getTransactionByHash`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransactionInfo {
    pub hash: String,
    pub from: String,
    pub nonce: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

impl TransactionInfo {
    pub fn nonce_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.nonce)
    }
}

/// Block with full transaction objects
#[derive(Debug, Clone, Deserialize)]
pub struct BlockWithTransactions {
    pub number: String,
    #[serde(default)]
    pub transactions: Vec<TransactionInfo>,
}

// =============================================================================
// TESTS
// =============================================================================
