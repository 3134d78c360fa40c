//! evindex-store — the versioned indexing store: column/table declarations,
//! cell values, the write-through cache, and pluggable [`versioned::Backend`]
//! implementations.
//!
//! Backends:
//! - [`versioned::MemoryBackend`] — in-memory (dev/testing, no persistence)
//! - [`postgres`] — PostgreSQL via `sqlx` (production)

pub mod cache;
pub mod column;
pub mod row;
pub mod store;
pub mod value;
pub mod versioned;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use cache::Cache;
pub use column::{ColumnFn, ColumnKind, ColumnSpec, TableSpec};
pub use row::Row;
pub use store::IndexingStore;
pub use value::CellValue;
pub use versioned::{Backend, MemoryBackend, VersionedRow};

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
