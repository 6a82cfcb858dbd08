//! Shared types for the projection pipeline.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProjectionError;

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A minimal summary of a block — enough to order, verify and roll back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── LogId ────────────────────────────────────────────────────────────────────

/// Identity of a log: `(block, tx, log index)`.
///
/// Ordering follows chain order — block number first, then log index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogId {
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.block_number, self.tx_hash, self.log_index)
    }
}

// ─── LogEvent ─────────────────────────────────────────────────────────────────

/// A decoded contract log as delivered by the chain-data provider.
///
/// `params` holds the decoded event arguments keyed by parameter name.
/// Large integers travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub block_number: u64,
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub log_index: u32,
    /// Contract address that emitted the log.
    pub address: String,
    /// Canonical event signature, e.g. `"MarketListed(address)"`.
    pub signature: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl LogEvent {
    /// The identity of this log.
    pub fn id(&self) -> LogId {
        LogId {
            block_number: self.block_number,
            log_index: self.log_index,
            tx_hash: self.tx_hash.clone(),
        }
    }

    /// Decode the params into a typed argument struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProjectionError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| ProjectionError::malformed(&self.signature, e.to_string()))
    }
}

// ─── Block / ChainEvent ───────────────────────────────────────────────────────

/// One block worth of logs, in the order the provider delivered them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockSummary,
    #[serde(default)]
    pub logs: Vec<LogEvent>,
}

impl Block {
    pub fn new(header: BlockSummary, logs: Vec<LogEvent>) -> Self {
        Self { header, logs }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

/// Inbound items of the ordered chain stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChainEvent {
    /// The next canonical block.
    Block(Block),
    /// Every block after `common_ancestor` is no longer canonical.
    #[serde(rename_all = "camelCase")]
    Reorg { common_ancestor: u64 },
}

// ─── EventContext ─────────────────────────────────────────────────────────────

/// Explicit per-log context handed to every handler and accessor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    /// The projector's chain slug (e.g. `"bsc"`).
    pub chain: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub tx_hash: String,
    pub log_index: u32,
}

impl EventContext {
    pub fn for_log(chain: impl Into<String>, log: &LogEvent) -> Self {
        Self {
            chain: chain.into(),
            block_number: log.block_number,
            block_timestamp: log.block_timestamp,
            tx_hash: log.tx_hash.clone(),
            log_index: log.log_index,
        }
    }

    pub fn log_id(&self) -> LogId {
        LogId {
            block_number: self.block_number,
            log_index: self.log_index,
            tx_hash: self.tx_hash.clone(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_extends_parent() {
        let parent = BlockSummary {
            number: 100,
            hash: "0xaaa".into(),
            parent_hash: "0x000".into(),
            timestamp: 1000,
        };
        let child = BlockSummary {
            number: 101,
            hash: "0xbbb".into(),
            parent_hash: "0xaaa".into(),
            timestamp: 1012,
        };
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn log_ids_order_by_block_then_index() {
        let a = LogId { block_number: 5, log_index: 9, tx_hash: "0xff".into() };
        let b = LogId { block_number: 6, log_index: 0, tx_hash: "0x00".into() };
        let c = LogId { block_number: 6, log_index: 1, tx_hash: "0x00".into() };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn decode_reports_malformed_params() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Args {
            account: String,
        }
        let log = LogEvent {
            block_number: 1,
            block_timestamp: 0,
            tx_hash: "0x1".into(),
            log_index: 0,
            address: "0x0".into(),
            signature: "MarketEntered(address,address)".into(),
            params: serde_json::json!({ "cToken": "0xaaa" }),
        };
        let err = log.decode::<Args>().unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedEvent { .. }));
    }

    #[test]
    fn chain_event_json_shape() {
        let ev: ChainEvent =
            serde_json::from_str(r#"{"kind":"reorg","commonAncestor":41}"#).unwrap();
        assert_eq!(ev, ChainEvent::Reorg { common_ancestor: 41 });
    }
}
