//! evindex-core — checkpoints, filters, and the canonical event types shared
//! by every other crate in the workspace.
//!
//! # Architecture
//!
//! ```text
//! evindex-sync  ──▶  evindex-events  ──▶  evindex-runtime  ──▶  evindex-store
//!  (per-chain          (build/decode/         (dispatch to        (write-through
//!   reorg-safe          split RawEvents)       user handlers)      cache + SQL)
//!   block stream)
//! ```
//!
//! This crate defines the vocabulary all of the above share: [`Checkpoint`]
//! orders events globally, the `filter` module decides what matches, and
//! `types` carries the record shapes (`RawEvent`, `Event`) that flow between
//! stages.

pub mod checkpoint;
pub mod error;
pub mod filter;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointParts, EventType};
pub use error::IndexerError;
pub use filter::{
    AddressSet, BlockFilter, BlockWindow, FactoryId, FactoryIndex, FactorySource, LogFilter,
    TopicSlot, TraceFilter, TransactionFilter, TransferFilter,
};
pub use types::{
    DecodedLog, DecodedTrace, Event, EventBlock, EventCount, EventLog, EventPayload, EventReceipt,
    EventTrace, EventTransaction, Hex, RawEvent,
};
