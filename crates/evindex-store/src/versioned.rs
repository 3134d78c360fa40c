//! Versioned rows — every table carries `effective_from`/`effective_to`
//! checkpoint columns; `"latest"` is the open-interval sentinel.
//!
//! `find_unique("latest")` resolves the open row; an explicit checkpoint
//! resolves the row whose `[effective_from, effective_to)` window contains
//! it. A plain upsert only ever has one live row per key; this generalizes
//! that into a close-old-row/open-new-row pair so a row's full history
//! stays queryable by checkpoint.

use async_trait::async_trait;
use evindex_core::error::IndexerError;

use crate::row::Row;

/// The open-interval sentinel for `effective_to`.
pub const LATEST: &str = "latest";

#[derive(Debug, Clone)]
pub struct VersionedRow {
    pub effective_from: String,
    pub effective_to: String,
    pub row: Row,
}

impl VersionedRow {
    pub fn is_open(&self) -> bool {
        self.effective_to == LATEST
    }

    /// Does this row's `[effective_from, effective_to)` window contain
    /// `checkpoint`? An open row (`effective_to == "latest"`) contains every
    /// checkpoint `>= effective_from`.
    pub fn contains(&self, checkpoint: &str) -> bool {
        if checkpoint < self.effective_from.as_str() {
            return false;
        }
        self.is_open() || checkpoint < self.effective_to.as_str()
    }
}

/// The transactional backend a [`crate::store::IndexingStore`] issues
/// versioned reads/writes against. `MemoryBackend` (below) is the default
/// test backend; `crate::postgres::PostgresBackend` is the production one.
#[async_trait]
pub trait Backend: Send + Sync {
    /// All versions of `key` in `table`, oldest first.
    async fn versions(&self, table: &str, key: &str) -> Result<Vec<VersionedRow>, IndexerError>;

    /// Atomically close the open row (if any) at `checkpoint` and open a new
    /// one starting at `checkpoint`. A single statement batch in a real
    /// backend; a single critical section here.
    async fn close_and_open(&self, table: &str, key: &str, checkpoint: &str, new_row: Row) -> Result<(), IndexerError>;

    /// Insert the first version of a row (no prior open row expected).
    async fn insert_initial(&self, table: &str, key: &str, checkpoint: &str, row: Row) -> Result<(), IndexerError>;

    /// Delete every version of `key` (used by plain `delete`, not reorg
    /// rollback — reorg rollback truncates by checkpoint instead).
    async fn delete_all(&self, table: &str, key: &str) -> Result<bool, IndexerError>;

    /// Truncate every row whose `effective_from > checkpoint` across every
    /// table, and reopen any row whose `effective_to > checkpoint` — the
    /// rollback-to-checkpoint operation the runtime performs on reorg.
    async fn rollback_to(&self, checkpoint: &str) -> Result<(), IndexerError>;

    /// Execute a raw SQL-equivalent statement inside a `SAVEPOINT` so a
    /// failure doesn't poison the surrounding transaction.
    async fn execute_raw(&self, statement: &str) -> Result<u64, IndexerError>;
}

/// In-memory [`Backend`] — the default in tests; no persistence, state
/// lives only as long as the process does.
#[derive(Default)]
pub struct MemoryBackend {
    tables: std::sync::Mutex<std::collections::HashMap<String, std::collections::HashMap<String, Vec<VersionedRow>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn versions(&self, table: &str, key: &str) -> Result<Vec<VersionedRow>, IndexerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned().unwrap_or_default())
    }

    async fn close_and_open(&self, table: &str, key: &str, checkpoint: &str, new_row: Row) -> Result<(), IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let versions = tables.entry(table.to_string()).or_default().entry(key.to_string()).or_default();
        if let Some(open) = versions.iter_mut().find(|v| v.is_open()) {
            open.effective_to = checkpoint.to_string();
        }
        versions.push(VersionedRow { effective_from: checkpoint.to_string(), effective_to: LATEST.to_string(), row: new_row });
        Ok(())
    }

    async fn insert_initial(&self, table: &str, key: &str, checkpoint: &str, row: Row) -> Result<(), IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let versions = tables.entry(table.to_string()).or_default().entry(key.to_string()).or_default();
        if versions.iter().any(|v| v.is_open()) {
            return Err(IndexerError::UniqueConstraintError { table: table.to_string(), columns: vec![key.to_string()] });
        }
        versions.push(VersionedRow { effective_from: checkpoint.to_string(), effective_to: LATEST.to_string(), row });
        Ok(())
    }

    async fn delete_all(&self, table: &str, key: &str) -> Result<bool, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        match tables.get_mut(table).and_then(|t| t.remove(key)) {
            Some(versions) => Ok(!versions.is_empty()),
            None => Ok(false),
        }
    }

    async fn rollback_to(&self, checkpoint: &str) -> Result<(), IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        for per_key in tables.values_mut() {
            for versions in per_key.values_mut() {
                versions.retain(|v| v.effective_from.as_str() <= checkpoint);
                if let Some(latest) = versions.iter_mut().max_by(|a, b| a.effective_from.cmp(&b.effective_from)) {
                    if latest.effective_to.as_str() > checkpoint && latest.effective_to != LATEST {
                        latest.effective_to = LATEST.to_string();
                    }
                }
            }
        }
        Ok(())
    }

    async fn execute_raw(&self, _statement: &str) -> Result<u64, IndexerError> {
        Ok(0)
    }
}

/// Resolve the version of `key` visible at `checkpoint` (`"latest"` for the
/// open row).
pub fn resolve<'a>(versions: &'a [VersionedRow], checkpoint: &str) -> Option<&'a VersionedRow> {
    if checkpoint == LATEST {
        return versions.iter().find(|v| v.is_open());
    }
    versions.iter().find(|v| v.contains(checkpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(balance: i64) -> Row {
        Row::new(BTreeMap::from([("balance".to_string(), crate::value::CellValue::Int(balance))]))
    }

    #[tokio::test]
    async fn latest_resolves_the_open_row() {
        let backend = MemoryBackend::new();
        backend.insert_initial("account", "0xa", "000", row(10)).await.unwrap();
        backend.close_and_open("account", "0xa", "010", row(20)).await.unwrap();

        let versions = backend.versions("account", "0xa").await.unwrap();
        let open = resolve(&versions, LATEST).unwrap();
        assert_eq!(open.row.get("balance"), Some(&crate::value::CellValue::Int(20)));
    }

    #[tokio::test]
    async fn explicit_checkpoint_resolves_historical_window() {
        let backend = MemoryBackend::new();
        backend.insert_initial("account", "0xa", "000", row(10)).await.unwrap();
        backend.close_and_open("account", "0xa", "010", row(20)).await.unwrap();

        let versions = backend.versions("account", "0xa").await.unwrap();
        let historical = resolve(&versions, "005").unwrap();
        assert_eq!(historical.row.get("balance"), Some(&crate::value::CellValue::Int(10)));
    }

    #[tokio::test]
    async fn insert_initial_twice_without_close_is_a_conflict() {
        let backend = MemoryBackend::new();
        backend.insert_initial("account", "0xa", "000", row(10)).await.unwrap();
        let err = backend.insert_initial("account", "0xa", "005", row(99)).await.unwrap_err();
        assert!(matches!(err, IndexerError::UniqueConstraintError { .. }));
    }

    #[tokio::test]
    async fn rollback_to_drops_versions_opened_after_checkpoint() {
        let backend = MemoryBackend::new();
        backend.insert_initial("account", "0xa", "000", row(10)).await.unwrap();
        backend.close_and_open("account", "0xa", "010", row(20)).await.unwrap();
        backend.close_and_open("account", "0xa", "020", row(30)).await.unwrap();

        backend.rollback_to("010").await.unwrap();

        let versions = backend.versions("account", "0xa").await.unwrap();
        assert_eq!(versions.len(), 2);
        let open = resolve(&versions, LATEST).unwrap();
        assert_eq!(open.row.get("balance"), Some(&crate::value::CellValue::Int(20)));
    }
}
