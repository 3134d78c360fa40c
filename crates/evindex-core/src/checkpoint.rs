//! Checkpoint — a fixed-width, lexicographically ordered position in the
//! global cross-chain event stream.
//!
//! The encoded form is a zero-padded concatenation of six decimal fields, in
//! the order below, so that string `<` agrees with tuple `<`:
//!
//! | field              | width |
//! |--------------------|-------|
//! | block_timestamp    | 10    |
//! | chain_id           | 16    |
//! | block_number       | 16    |
//! | transaction_index  | 16    |
//! | event_type         | 1     |
//! | event_index        | 16    |
//!
//! `event_type` is a stable, unique digit per event kind; every kind gets
//! its own code (see [`EventType`]) so two events in the same transaction
//! can never compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const WIDTH_TIMESTAMP: usize = 10;
const WIDTH_CHAIN_ID: usize = 16;
const WIDTH_BLOCK_NUMBER: usize = 16;
const WIDTH_TX_INDEX: usize = 16;
const WIDTH_EVENT_TYPE: usize = 1;
const WIDTH_EVENT_INDEX: usize = 16;

const TOTAL_WIDTH: usize = WIDTH_TIMESTAMP
    + WIDTH_CHAIN_ID
    + WIDTH_BLOCK_NUMBER
    + WIDTH_TX_INDEX
    + WIDTH_EVENT_TYPE
    + WIDTH_EVENT_INDEX;

/// The kind of chain data an event was derived from.
///
/// Codes are single decimal digits and must never collide — the checkpoint's
/// total order depends on every kind having a distinct digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    Block = 0,
    Transaction = 1,
    Log = 2,
    Trace = 3,
    Transfer = 4,
}

impl EventType {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Result<Self, CheckpointError> {
        match code {
            0 => Ok(Self::Block),
            1 => Ok(Self::Transaction),
            2 => Ok(Self::Log),
            3 => Ok(Self::Trace),
            4 => Ok(Self::Transfer),
            other => Err(CheckpointError::InvalidEventType(other)),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Transaction => write!(f, "transaction"),
            Self::Log => write!(f, "log"),
            Self::Trace => write!(f, "trace"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

/// Errors produced while encoding or decoding a checkpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint string has wrong length: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("checkpoint field '{field}' is not a valid decimal number: {value:?}")]
    InvalidDigits { field: &'static str, value: String },

    #[error("invalid event type code: {0}")]
    InvalidEventType(u8),
}

/// The six fields that uniquely order an event in the global stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointParts {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub event_type: EventType,
    pub event_index: u64,
}

/// An encoded checkpoint. Lexicographic `String` ordering equals tuple
/// ordering on [`CheckpointParts`] by construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint(String);

impl Checkpoint {
    /// Encode a set of parts into a checkpoint string.
    pub fn encode(parts: CheckpointParts) -> Self {
        let s = format!(
            "{:0w0$}{:0w1$}{:0w2$}{:0w3$}{:0w4$}{:0w5$}",
            parts.block_timestamp,
            parts.chain_id,
            parts.block_number,
            parts.transaction_index,
            parts.event_type.code(),
            parts.event_index,
            w0 = WIDTH_TIMESTAMP,
            w1 = WIDTH_CHAIN_ID,
            w2 = WIDTH_BLOCK_NUMBER,
            w3 = WIDTH_TX_INDEX,
            w4 = WIDTH_EVENT_TYPE,
            w5 = WIDTH_EVENT_INDEX,
        );
        debug_assert_eq!(s.len(), TOTAL_WIDTH);
        Self(s)
    }

    /// Decode a checkpoint string back into its parts.
    pub fn decode(s: &str) -> Result<CheckpointParts, CheckpointError> {
        if s.len() != TOTAL_WIDTH {
            return Err(CheckpointError::WrongLength {
                expected: TOTAL_WIDTH,
                actual: s.len(),
            });
        }

        let mut offset = 0;
        let mut field = |name: &'static str, width: usize| -> Result<u64, CheckpointError> {
            let slice = &s[offset..offset + width];
            offset += width;
            slice
                .parse::<u64>()
                .map_err(|_| CheckpointError::InvalidDigits { field: name, value: slice.to_string() })
        };

        let block_timestamp = field("block_timestamp", WIDTH_TIMESTAMP)?;
        let chain_id = field("chain_id", WIDTH_CHAIN_ID)?;
        let block_number = field("block_number", WIDTH_BLOCK_NUMBER)?;
        let transaction_index = field("transaction_index", WIDTH_TX_INDEX)?;
        let event_type_code = field("event_type", WIDTH_EVENT_TYPE)? as u8;
        let event_index = field("event_index", WIDTH_EVENT_INDEX)?;

        Ok(CheckpointParts {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index,
            event_type: EventType::from_code(event_type_code)?,
            event_index,
        })
    }

    /// The all-zero sentinel — smaller than every real checkpoint.
    pub fn zero() -> Self {
        Self("0".repeat(TOTAL_WIDTH))
    }

    /// The all-nine sentinel — larger than every real checkpoint.
    pub fn max() -> Self {
        Self("9".repeat(TOTAL_WIDTH))
    }

    /// The largest possible checkpoint belonging to a given block: pins
    /// timestamp/chain/block_number and saturates everything after. Used by
    /// `split_events` to give a block-level upper boundary.
    pub fn max_of_block(block_timestamp: u64, chain_id: u64, block_number: u64) -> Self {
        let prefix = format!(
            "{:0w0$}{:0w1$}{:0w2$}",
            block_timestamp,
            chain_id,
            block_number,
            w0 = WIDTH_TIMESTAMP,
            w1 = WIDTH_CHAIN_ID,
            w2 = WIDTH_BLOCK_NUMBER,
        );
        let suffix = "9".repeat(WIDTH_TX_INDEX + WIDTH_EVENT_TYPE + WIDTH_EVENT_INDEX);
        Self(prefix + &suffix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Checkpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
