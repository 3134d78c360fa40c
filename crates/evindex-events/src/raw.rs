//! The block-aligned batch shape `build_events` consumes: `{blocks, logs,
//! transactions, receipts, traces, childAddresses}` for one chain.

use evindex_core::Hex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub number: u64,
    pub hash: Hex,
    pub parent_hash: Hex,
    pub timestamp: u64,
    pub logs_bloom: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: Hex,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Hex,
    pub to: Option<Hex>,
    pub input: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReceipt {
    pub transaction_hash: Hex,
    pub status: bool,
    pub gas_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Hex,
    pub topics: Vec<Hex>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: Hex,
    pub transaction_index: u64,
    pub log_index: u64,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrace {
    pub block_number: u64,
    pub transaction_hash: Hex,
    pub transaction_index: u64,
    pub trace_index: u64,
    pub from: Hex,
    pub to: Option<Hex>,
    pub call_type: String,
    pub input: String,
    pub output: Option<String>,
    pub value: String,
    pub error: Option<String>,
}

/// Newly matched factory child addresses discovered in this batch, keyed by
/// factory id.
pub type ChildAddresses = std::collections::HashMap<String, Vec<(String, u64)>>;

/// One chain's block-aligned batch of chain data, as produced by the
/// historical backfill source or the realtime sync service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainBatch {
    pub blocks: Vec<RawBlock>,
    pub transactions: Vec<RawTransaction>,
    pub receipts: Vec<RawReceipt>,
    pub logs: Vec<RawLog>,
    pub traces: Vec<RawTrace>,
    #[serde(default)]
    pub child_addresses: ChildAddresses,
}
