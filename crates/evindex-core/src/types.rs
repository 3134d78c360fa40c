//! The canonical record types produced by the event pipeline and consumed by
//! the indexing runtime: `RawEvent` (pre-decode) and `Event` (post-decode).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, EventType};

/// A hex-encoded address or hash (`0x…`). Kept as a validated newtype rather
/// than a bare `String` so a block hash can't be passed where an address is
/// expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hex(String);

impl Hex {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minimal block header fields carried on every event: enough for handler
/// context without forcing a full block fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBlock {
    pub number: u64,
    pub hash: Hex,
    pub timestamp: u64,
}

/// A transaction referenced by a matched log/trace, or matched directly by a
/// transaction filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTransaction {
    pub hash: Hex,
    pub transaction_index: u64,
    pub from: Hex,
    pub to: Option<Hex>,
    pub input: String,
    pub value: String,
}

/// The receipt for `EventTransaction`, fetched only when a matched filter
/// requires it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    pub status: bool,
    pub gas_used: u64,
}

/// A matched log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub address: Hex,
    pub topics: Vec<Hex>,
    pub data: String,
    pub log_index: u64,
    pub removed: bool,
}

/// A matched call trace (and, when `value > 0`, the basis of a transfer
/// event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrace {
    pub trace_index: u64,
    pub from: Hex,
    pub to: Option<Hex>,
    pub call_type: String,
    pub input: String,
    pub output: Option<String>,
    pub value: String,
    pub error: Option<String>,
}

/// The raw, pre-decode record emitted by `build_events`: a matched piece of
/// chain data plus the `Checkpoint` that orders it and the index of the
/// callback (handler registration) that matched it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub chain_id: u64,
    pub event_callback_index: usize,
    pub checkpoint: Checkpoint,
    pub kind: EventType,
    pub block: EventBlock,
    pub transaction: Option<EventTransaction>,
    pub transaction_receipt: Option<EventReceipt>,
    pub log: Option<EventLog>,
    pub trace: Option<EventTrace>,
}

impl RawEvent {
    /// Per §3, `block.number` must equal the checkpoint's `block_number`
    /// field — this is checked by `build_events`/tests, not enforced at
    /// construction, since the checkpoint is itself derived from the block.
    pub fn checkpoint_block_number(&self) -> Result<u64, crate::checkpoint::CheckpointError> {
        Ok(Checkpoint::decode(self.checkpoint.as_str())?.block_number)
    }
}

/// Decoded payload for a `Log`-kind event: topics/data decoded against the
/// registered ABI event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedLog {
    pub event_name: String,
    pub args: serde_json::Value,
}

/// Decoded payload for a `Trace`-kind event: input decoded against the ABI
/// function, output decoded separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedTrace {
    pub function_name: String,
    pub args: serde_json::Value,
    pub result: Option<serde_json::Value>,
}

/// The decoded payload carried by an [`Event`]. `Transaction`/`Transfer`/
/// `Block` events carry no decoded payload — they're repackaged as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Block,
    Transaction,
    Transfer,
    Log(DecodedLog),
    Trace(DecodedTrace),
}

/// A fully decoded event, ready for dispatch to a user handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub raw: RawEvent,
    pub payload: EventPayload,
}

impl Event {
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.raw.checkpoint
    }

    pub fn chain_id(&self) -> u64 {
        self.raw.chain_id
    }
}

/// `map<handlerName, count>` — tracks matched event counts per handler.
/// Monotonic for the lifetime of a run.
pub type EventCount = HashMap<String, u64>;
