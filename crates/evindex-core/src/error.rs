//! Error taxonomy for the indexing pipeline.

use thiserror::Error;

/// Errors that can occur anywhere in the indexing pipeline: sync, the event
/// pipeline, the store, and the runtime all report through this type.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("reorg detected at block {block_number}: expected hash {expected}, got {actual}")]
    ReorgDetected {
        block_number: u64,
        expected: String,
        actual: String,
    },

    #[error("unrecoverable reorg: walked back {depth} blocks without finding a common ancestor")]
    UnrecoverableReorg { depth: u64 },

    #[error("checkpoint mismatch at block {block_number}")]
    CheckpointMismatch { block_number: u64 },

    #[error("indexer aborted: {reason}")]
    Aborted { reason: String },

    /// A filter matched an event that required transaction/trace data but the
    /// underlying RPC response didn't carry it (e.g. a log-only response
    /// fetched for a filter that also matched transactions).
    #[error("missing receipt for tx {tx_hash} required by a matched filter")]
    MissingReceipt { tx_hash: String },

    /// A `NOT NULL` column received no value and has no default.
    #[error("column '{column}' on table '{table}' is NOT NULL but no value was provided")]
    NotNullConstraintError { table: String, column: String },

    /// A unique/primary-key constraint was violated by an insert or update.
    #[error("unique constraint violated on table '{table}' columns {columns:?}")]
    UniqueConstraintError { table: String, columns: Vec<String> },

    /// A JSON column received an integer that cannot round-trip through
    /// `f64` (JSON has no native bigint type).
    #[error("value {value} for column '{column}' exceeds JSON-safe integer range")]
    BigIntSerializationError { column: String, value: String },

    /// Any other error surfaced by the underlying database driver.
    #[error("indexing database error: {0}")]
    IndexingDBError(String),

    /// An error raised from inside a user-provided raw `sql` escape-hatch
    /// callback.
    #[error("raw sql error: {0}")]
    RawSqlError(String),

    /// A handler read a column it declared no dependency on, so the cache's
    /// narrowed `include` set didn't fetch it — re-run with full columns.
    #[error("handler accessed column '{column}' on table '{table}' outside its declared access set")]
    InvalidEventAccessError { table: String, column: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error represents a reorg (recoverable by
    /// rewinding and replaying, as opposed to a fatal condition).
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDetected { .. })
    }

    /// Returns `true` if the runtime should treat this as fatal (stop the
    /// indexer rather than retry), following the retryable/fatal split named
    /// for per-event dispatch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnrecoverableReorg { .. }
                | Self::Aborted { .. }
                | Self::NotNullConstraintError { .. }
                | Self::UniqueConstraintError { .. }
                | Self::BigIntSerializationError { .. }
                | Self::InvalidEventAccessError { .. }
        )
    }
}
