//! evindex-events — the event pipeline: `build_events`, `decode_events`,
//! `split_events`.
//!
//! Transforms one chain's aligned `{blocks, transactions, receipts, logs,
//! traces}` batch into a checkpoint-sorted, decoded, block-grouped stream
//! the indexing runtime dispatches to user handlers. Purely functional and
//! single-threaded per invocation — no I/O happens in this crate.

pub mod build;
pub mod decode;
pub mod raw;
pub mod split;

pub use build::{build_events, EventCallback};
pub use decode::{decode_events, AbiDecoder, DecodeError, DecodeFailures};
pub use raw::{ChainBatch, ChildAddresses, RawBlock, RawLog, RawReceipt, RawTrace, RawTransaction};
pub use split::{split_events, EventGroup};
