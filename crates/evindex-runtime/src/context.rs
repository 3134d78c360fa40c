//! Per-event handler context: `{chain, blockNumber, checkpoint}` pinned
//! fresh before every dispatch. Small and cheap to clone, rebuilt per
//! event rather than mutated in place.

use evindex_core::checkpoint::Checkpoint;

/// The phase the runtime is currently in — informs handlers that want to
/// skip expensive work during backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Historical,
    Realtime,
}

/// Context passed to every handler invocation. Cheap to clone; rebuilt for
/// each event rather than mutated in place, so a handler can't observe a
/// half-updated context from a concurrently dispatched event (there never
/// is one — no two events for the same chain are ever in flight
/// simultaneously, but the type doesn't rely on that for its own
/// soundness).
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub chain_id: u64,
    pub chain_name: String,
    pub block_number: u64,
    pub checkpoint: Checkpoint,
    pub phase: Phase,
}

impl HandlerContext {
    pub fn new(chain_id: u64, chain_name: impl Into<String>) -> Self {
        Self {
            chain_id,
            chain_name: chain_name.into(),
            block_number: 0,
            checkpoint: Checkpoint::zero(),
            phase: Phase::Historical,
        }
    }

    pub fn for_event(chain_id: u64, chain_name: &str, block_number: u64, checkpoint: Checkpoint, phase: Phase) -> Self {
        Self { chain_id, chain_name: chain_name.to_string(), block_number, checkpoint, phase }
    }
}
