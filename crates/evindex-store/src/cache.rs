//! The write-through cache fronting the versioned store.
//!
//! Backs a map `tableName -> (primaryKey -> {current, snapshot_at_last_flush,
//! accessed_columns})`. Bound to exactly one in-flight logical transaction
//! at a time; the runtime resets it (via [`Cache::clear`]) between reorg
//! recovery and a fresh dispatch pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use evindex_core::error::IndexerError;

use crate::row::Row;
use crate::versioned::{resolve, Backend, LATEST};

#[derive(Debug, Clone)]
pub struct CachedRow {
    pub current: Row,
    pub snapshot_at_last_flush: Option<Row>,
    pub accessed_columns: HashSet<String>,
    dirty: bool,
    is_new: bool,
}

/// `cache_requests_total{type=hit|miss|complete}` as plain counters — the
/// no-op default a test backend reaches for in place of a real metrics
/// registry.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub completes: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed), self.completes.load(Ordering::Relaxed))
    }
}

pub struct Cache<B: Backend> {
    backend: Arc<B>,
    rows: Mutex<HashMap<String, HashMap<String, CachedRow>>>,
    pub metrics: CacheMetrics,
}

impl<B: Backend> Cache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend, rows: Mutex::new(HashMap::new()), metrics: CacheMetrics::default() }
    }

    /// Escape hatch for callers (the `sql` raw-statement path) that need the
    /// backend directly rather than going through cached rows.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `find(table, key)` — cache first, then DB inside the current
    /// transaction, filling the cache on miss.
    pub async fn find(&self, table: &str, key: &str) -> Result<Option<Row>, IndexerError> {
        self.metrics.completes.fetch_add(1, Ordering::Relaxed);

        if let Some(row) = self.cached_current(table, key) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(row));
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        let versions = self.backend.versions(table, key).await?;
        let Some(found) = resolve(&versions, LATEST) else { return Ok(None) };
        let row = found.row.clone();

        let mut rows = self.rows.lock().unwrap();
        rows.entry(table.to_string()).or_default().insert(
            key.to_string(),
            CachedRow { current: row.clone(), snapshot_at_last_flush: Some(row.clone()), accessed_columns: HashSet::new(), dirty: false, is_new: false },
        );
        Ok(Some(row))
    }

    fn cached_current(&self, table: &str, key: &str) -> Option<Row> {
        let rows = self.rows.lock().unwrap();
        rows.get(table).and_then(|t| t.get(key)).map(|c| c.current.clone())
    }

    /// `insert(table).values(v)`. Fails with `UniqueConstraintError` if a
    /// row already exists at this key (plain insert, no conflict clause).
    pub async fn insert(&self, table: &str, key: &str, row: Row) -> Result<Row, IndexerError> {
        if self.find(table, key).await?.is_some() {
            return Err(IndexerError::UniqueConstraintError { table: table.to_string(), columns: vec![key.to_string()] });
        }
        let mut rows = self.rows.lock().unwrap();
        rows.entry(table.to_string()).or_default().insert(
            key.to_string(),
            CachedRow { current: row.clone(), snapshot_at_last_flush: None, accessed_columns: HashSet::new(), dirty: true, is_new: true },
        );
        Ok(row)
    }

    /// `insert(...).onConflictDoNothing()`: returns `None` for a conflicted
    /// key instead of erroring.
    pub async fn insert_or_do_nothing(&self, table: &str, key: &str, row: Row) -> Result<Option<Row>, IndexerError> {
        if self.find(table, key).await?.is_some() {
            return Ok(None);
        }
        Ok(Some(self.insert(table, key, row).await?))
    }

    /// `insert(...).onConflictDoUpdate(patch)`: applies `patch` to the
    /// existing row on conflict, otherwise inserts.
    pub async fn insert_or_update<F>(&self, table: &str, key: &str, row: Row, patch: F) -> Result<Row, IndexerError>
    where
        F: FnOnce(&Row) -> Row,
    {
        match self.find(table, key).await? {
            Some(existing) => self.update(table, key, |_| patch(&existing)).await,
            None => self.insert(table, key, row).await,
        }
    }

    /// `update(table, keyPred).set(patchOrFn)`: returns the post-image.
    pub async fn update<F>(&self, table: &str, key: &str, patch: F) -> Result<Row, IndexerError>
    where
        F: FnOnce(&Row) -> Row,
    {
        let existing = self.find(table, key).await?.ok_or_else(|| IndexerError::IndexingDBError(format!("update on missing row {table}:{key}")))?;
        let new_row = patch(&existing);

        let mut rows = self.rows.lock().unwrap();
        let table_rows = rows.entry(table.to_string()).or_default();
        let entry = table_rows.get_mut(key).expect("find() above populated this entry");
        entry.current = new_row.clone();
        entry.accessed_columns.extend(new_row.accessed_columns());
        entry.dirty = true;
        Ok(new_row)
    }

    /// `delete(table, keyPred) → bool`.
    pub async fn delete(&self, table: &str, key: &str) -> Result<bool, IndexerError> {
        let existed = self.find(table, key).await?.is_some();
        {
            let mut rows = self.rows.lock().unwrap();
            if let Some(t) = rows.get_mut(table) {
                t.remove(key);
            }
        }
        if existed {
            self.backend.delete_all(table, key).await?;
        }
        Ok(existed)
    }

    /// Push every dirty row to the backend in one batch, closing the old
    /// open version and opening a new one at `checkpoint`. After a
    /// successful flush the cache is consistent with the DB at `checkpoint`
    /// and snapshots are discarded.
    pub async fn flush(&self, checkpoint: &str) -> Result<(), IndexerError> {
        let dirty: Vec<(String, String, Row, bool)> = {
            let rows = self.rows.lock().unwrap();
            rows.iter()
                .flat_map(|(table, keyed)| {
                    keyed.iter().filter(|(_, c)| c.dirty).map(move |(key, c)| (table.clone(), key.clone(), c.current.clone(), c.is_new))
                })
                .collect()
        };

        for (table, key, row, is_new) in dirty {
            if is_new {
                self.backend.insert_initial(&table, &key, checkpoint, row).await?;
            } else {
                self.backend.close_and_open(&table, &key, checkpoint, row).await?;
            }
        }

        let mut rows = self.rows.lock().unwrap();
        for keyed in rows.values_mut() {
            for cached in keyed.values_mut() {
                cached.dirty = false;
                cached.is_new = false;
                cached.snapshot_at_last_flush = Some(cached.current.clone());
            }
        }
        Ok(())
    }

    /// Drop all cached state (used for reorg — the next read re-fills from
    /// the backend, which itself has been rolled back to the safe
    /// checkpoint by then).
    pub fn clear(&self) {
        self.rows.lock().unwrap().clear();
    }

    /// Drop `current`/`accessed_columns` for one row, forcing the next read
    /// to go to the DB. Unlike `clear()`, only touches the one row.
    pub fn invalidate(&self, table: &str, key: &str) {
        if let Some(t) = self.rows.lock().unwrap().get_mut(table) {
            t.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CellValue;
    use crate::versioned::MemoryBackend;
    use std::collections::BTreeMap;

    fn row(balance: i64, address: &str) -> Row {
        Row::new(BTreeMap::from([
            ("address".to_string(), CellValue::Text(address.to_string())),
            ("balance".to_string(), CellValue::Int(balance)),
        ]))
    }

    fn cache() -> Cache<MemoryBackend> {
        Cache::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn insert_then_find_returns_last_effective_mutation() {
        let cache = cache();
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        let found = cache.find("account", "0xa").await.unwrap().unwrap();
        assert_eq!(found.get("balance"), Some(&CellValue::Int(10)));
    }

    #[tokio::test]
    async fn conflict_do_nothing_keeps_existing_value() {
        let cache = cache();
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        let result = cache.insert_or_do_nothing("account", "0xa", row(44, "0xa")).await.unwrap();
        assert!(result.is_none());
        let found = cache.find("account", "0xa").await.unwrap().unwrap();
        assert_eq!(found.get("balance"), Some(&CellValue::Int(10)));
    }

    #[tokio::test]
    async fn update_twice_accumulates() {
        let cache = cache();
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        for _ in 0..2 {
            cache
                .update("account", "0xa", |current| {
                    let balance = match current.get("balance") {
                        Some(CellValue::Int(b)) => *b,
                        _ => 0,
                    };
                    row(balance + 10, "0xa")
                })
                .await
                .unwrap();
        }
        let found = cache.find("account", "0xa").await.unwrap().unwrap();
        assert_eq!(found.get("balance"), Some(&CellValue::Int(30)));
    }

    #[tokio::test]
    async fn delete_nonexistent_returns_false_existing_returns_true() {
        let cache = cache();
        assert!(!cache.delete("account", "0xmissing").await.unwrap());
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        assert!(cache.delete("account", "0xa").await.unwrap());
        assert!(cache.find("account", "0xa").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flush_persists_to_backend_and_survives_cache_clear() {
        let cache = cache();
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        cache.flush("000").await.unwrap();
        cache.clear();
        let found = cache.find("account", "0xa").await.unwrap().unwrap();
        assert_eq!(found.get("balance"), Some(&CellValue::Int(10)));
    }

    #[tokio::test]
    async fn invalidate_forces_next_read_from_backend() {
        let cache = cache();
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        cache.flush("000").await.unwrap();
        cache.invalidate("account", "0xa");
        let found = cache.find("account", "0xa").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn metrics_count_hits_and_misses() {
        let cache = cache();
        cache.insert("account", "0xa", row(10, "0xa")).await.unwrap();
        cache.find("account", "0xa").await.unwrap();
        let (hits, _, completes) = cache.metrics.snapshot();
        assert!(hits >= 1);
        assert!(completes >= 2);

        cache.invalidate("account", "0xa");
        cache.find("account", "0xa").await.unwrap();
        let (_, misses, _) = cache.metrics.snapshot();
        assert!(misses >= 1);
    }
}
