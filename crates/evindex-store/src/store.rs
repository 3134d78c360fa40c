//! `IndexingStore` — the contract user handlers see: `find`/`insert`/
//! `update`/`delete` plus the raw `sql` escape hatch, with column semantics
//! (not-null, defaults, PK immutability, bigint/text rules) enforced in
//! front of the write-through [`Cache`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use evindex_core::error::IndexerError;

use crate::cache::Cache;
use crate::column::{ColumnKind, TableSpec};
use crate::row::Row;
use crate::value::{json_rejects_bigint, strip_trailing_nul, CellValue};
use crate::versioned::Backend;

/// The indexing store: one per chain-handler-dispatch context, bound to
/// exactly one in-flight transaction at a time (the cache it wraps).
pub struct IndexingStore<B: Backend> {
    tables: HashMap<String, TableSpec>,
    cache: Cache<B>,
    /// `sql` must install any needed DB triggers on first use — exactly
    /// once per session.
    triggers_installed: AtomicBool,
    /// When set, any column touched outside this set is an
    /// `InvalidEventAccessError` — the runtime installs its narrowed
    /// include set here once backfill has converged.
    allowed_columns: Mutex<Option<HashSet<String>>>,
    /// Columns touched since the last [`Self::take_accessed_columns`] —
    /// one handler invocation's access set.
    accessed_columns: Mutex<HashSet<String>>,
}

impl<B: Backend> IndexingStore<B> {
    pub fn new(backend: Arc<B>, tables: Vec<TableSpec>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            cache: Cache::new(backend),
            triggers_installed: AtomicBool::new(false),
            allowed_columns: Mutex::new(None),
            accessed_columns: Mutex::new(HashSet::new()),
        }
    }

    pub fn cache_metrics(&self) -> &crate::cache::CacheMetrics {
        &self.cache.metrics
    }

    /// Restrict column access to `allowed` (`None` lifts the restriction).
    pub fn set_allowed_columns(&self, allowed: Option<HashSet<String>>) {
        *self.allowed_columns.lock().unwrap() = allowed;
    }

    /// Drain the columns touched since the last call — the per-event
    /// access set the runtime's include narrowing consumes.
    pub fn take_accessed_columns(&self) -> HashSet<String> {
        std::mem::take(&mut *self.accessed_columns.lock().unwrap())
    }

    fn note_access<'a>(&self, table: &str, columns: impl IntoIterator<Item = &'a String>) -> Result<(), IndexerError> {
        let allowed = self.allowed_columns.lock().unwrap();
        let mut accessed = self.accessed_columns.lock().unwrap();
        for column in columns {
            if let Some(allowed) = allowed.as_ref() {
                if !allowed.contains(column) {
                    return Err(IndexerError::InvalidEventAccessError { table: table.to_string(), column: column.clone() });
                }
            }
            accessed.insert(column.clone());
        }
        Ok(())
    }

    fn table_spec(&self, table: &str) -> Result<&TableSpec, IndexerError> {
        self.tables.get(table).ok_or_else(|| IndexerError::IndexingDBError(format!("unknown table '{table}'")))
    }

    fn primary_key_value(&self, table: &TableSpec, values: &BTreeMap<String, CellValue>) -> Result<String, IndexerError> {
        values
            .get(&table.primary_key)
            .map(|v| v.to_string())
            .ok_or_else(|| IndexerError::NotNullConstraintError { table: table.name.clone(), column: table.primary_key.clone() })
    }

    /// Not-null and per-kind value checks over a complete row image.
    fn validate_row(&self, table: &TableSpec, mut values: BTreeMap<String, CellValue>) -> Result<Row, IndexerError> {
        for (name, spec) in &table.columns {
            match values.get(name) {
                None | Some(CellValue::Null) if spec.not_null => {
                    return Err(IndexerError::NotNullConstraintError { table: table.name.clone(), column: name.clone() });
                }
                _ => {}
            }
            if let Some(value) = values.get_mut(name) {
                normalize_value(name, &spec.kind, value)?;
            }
        }
        Ok(Row::new(values))
    }

    /// Fill insert-time defaults (`$default(fn)` wins over `default(v)`),
    /// then validate.
    fn build_insert_row(&self, table: &TableSpec, mut values: BTreeMap<String, CellValue>) -> Result<Row, IndexerError> {
        for (name, spec) in &table.columns {
            if !values.contains_key(name) {
                if let Some(f) = &spec.on_insert_fn {
                    values.insert(name.clone(), f());
                } else if let Some(default) = &spec.default {
                    values.insert(name.clone(), default.clone());
                }
            }
        }
        self.validate_row(table, values)
    }

    /// Merge a patch over the existing row, recompute `$onUpdateFn` columns
    /// the patch didn't explicitly set, then validate. Columns absent from
    /// the patch keep their current value.
    fn build_update_row(&self, table: &TableSpec, existing: &Row, patch: BTreeMap<String, CellValue>) -> Result<Row, IndexerError> {
        let patch_keys: HashSet<String> = patch.keys().cloned().collect();
        let mut merged = existing.raw_values().clone();
        merged.extend(patch);
        for (name, spec) in &table.columns {
            if !patch_keys.contains(name) {
                if let Some(f) = &spec.on_update_fn {
                    merged.insert(name.clone(), f());
                }
            }
        }
        self.validate_row(table, merged)
    }

    fn reject_primary_key_change(&self, table: &TableSpec, key: &str, patch: &BTreeMap<String, CellValue>) -> Result<(), IndexerError> {
        if let Some(new_pk) = patch.get(&table.primary_key) {
            if new_pk.to_string() != key {
                return Err(IndexerError::IndexingDBError(format!(
                    "primary key is immutable: cannot change '{}' from {key} to {new_pk}",
                    table.primary_key
                )));
            }
        }
        Ok(())
    }

    /// `find(table, keyPred) → row | null`.
    pub async fn find(&self, table: &str, key: &str) -> Result<Option<Row>, IndexerError> {
        self.table_spec(table)?;
        self.cache.find(table, key).await
    }

    /// Plain `insert(table).values(v)`. Duplicate PK ⇒ `UniqueConstraintError`.
    pub async fn insert(&self, table: &str, values: BTreeMap<String, CellValue>) -> Result<Row, IndexerError> {
        let spec = self.table_spec(table)?.clone();
        let key = self.primary_key_value(&spec, &values)?;
        self.note_access(table, values.keys())?;
        let row = self.build_insert_row(&spec, values)?;
        self.cache.insert(table, &key, row).await
    }

    /// Batch insert — parallel result list, same semantics as a single
    /// insert applied to each value.
    pub async fn insert_batch(&self, table: &str, values: Vec<BTreeMap<String, CellValue>>) -> Vec<Result<Row, IndexerError>> {
        let mut results = Vec::with_capacity(values.len());
        for v in values {
            results.push(self.insert(table, v).await);
        }
        results
    }

    /// `.onConflictDoNothing()`.
    pub async fn insert_or_do_nothing(&self, table: &str, values: BTreeMap<String, CellValue>) -> Result<Option<Row>, IndexerError> {
        let spec = self.table_spec(table)?.clone();
        let key = self.primary_key_value(&spec, &values)?;
        if self.find(table, &key).await?.is_some() {
            return Ok(None);
        }
        self.note_access(table, values.keys())?;
        let row = self.build_insert_row(&spec, values)?;
        Ok(Some(self.cache.insert(table, &key, row).await?))
    }

    /// `.onConflictDoUpdate(setOrFn)`: insert, or patch the existing row on
    /// conflict.
    pub async fn insert_or_update<F>(&self, table: &str, values: BTreeMap<String, CellValue>, patch: F) -> Result<Row, IndexerError>
    where
        F: FnOnce(&Row) -> BTreeMap<String, CellValue>,
    {
        let spec = self.table_spec(table)?.clone();
        let key = self.primary_key_value(&spec, &values)?;
        match self.find(table, &key).await? {
            Some(existing) => {
                let patched = patch(&existing);
                let read_columns = existing.accessed_columns();
                self.note_access(table, patched.keys().chain(read_columns.iter()))?;
                self.reject_primary_key_change(&spec, &key, &patched)?;
                let new_row = self.build_update_row(&spec, &existing, patched)?;
                self.cache.update(table, &key, move |_| new_row).await
            }
            None => {
                self.note_access(table, values.keys())?;
                let row = self.build_insert_row(&spec, values)?;
                self.cache.insert(table, &key, row).await
            }
        }
    }

    /// `update(table, keyPred).set(patchOrFn)`. Rejects changing the
    /// primary key to a different value with `IndexingDBError`; setting it
    /// to the same value is a no-op for the PK column.
    pub async fn update<F>(&self, table: &str, key: &str, patch: F) -> Result<Row, IndexerError>
    where
        F: FnOnce(&Row) -> BTreeMap<String, CellValue>,
    {
        let spec = self.table_spec(table)?.clone();
        let existing = self
            .find(table, key)
            .await?
            .ok_or_else(|| IndexerError::IndexingDBError(format!("update on missing row {table}:{key}")))?;
        let patched = patch(&existing);
        // A functional patch's reads were recorded by the row proxy.
        let read_columns = existing.accessed_columns();
        self.note_access(table, patched.keys().chain(read_columns.iter()))?;
        self.reject_primary_key_change(&spec, key, &patched)?;
        let new_row = self.build_update_row(&spec, &existing, patched)?;
        self.cache.update(table, key, move |_| new_row).await
    }

    /// `delete(table, keyPred) → bool`.
    pub async fn delete(&self, table: &str, key: &str) -> Result<bool, IndexerError> {
        self.table_spec(table)?;
        self.cache.delete(table, key).await
    }

    pub async fn flush(&self, checkpoint: &str) -> Result<(), IndexerError> {
        self.cache.flush(checkpoint).await
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn invalidate(&self, table: &str, key: &str) {
        self.cache.invalidate(table, key);
    }

    /// Roll every table back to `checkpoint` and drop the cache — the
    /// store-level reorg recovery the runtime invokes on a `reorg` event.
    pub async fn rollback_to(&self, checkpoint: &str) -> Result<(), IndexerError> {
        self.cache.backend().rollback_to(checkpoint).await?;
        self.cache.clear();
        Ok(())
    }

    /// The raw `sql` escape hatch. Writes bypass the cache but share the
    /// same transaction; wrapped in a `SAVEPOINT`/`ROLLBACK TO` so a failed
    /// statement can't poison later ones. Triggers are installed lazily, on
    /// the first call in the store's lifetime.
    pub async fn sql(&self, statement: &str) -> Result<u64, IndexerError> {
        if !self.triggers_installed.swap(true, Ordering::SeqCst) {
            self.install_triggers().await?;
        }

        match self.cache.backend().execute_raw(statement).await {
            Ok(affected) => Ok(affected),
            Err(e) => {
                // The backend savepoints internally; this layer's job is to
                // translate the failure, not retry it.
                Err(IndexerError::RawSqlError(format!("{e}")))
            }
        }
    }

    async fn install_triggers(&self) -> Result<(), IndexerError> {
        // No triggers are required by any table kind this store currently
        // supports; kept as an explicit no-op hook so a future column kind
        // needing one has somewhere to install it exactly once.
        Ok(())
    }
}

fn normalize_value(column: &str, kind: &ColumnKind, value: &mut CellValue) -> Result<(), IndexerError> {
    match (kind, &value) {
        (ColumnKind::Text | ColumnKind::Varchar | ColumnKind::Char, CellValue::Text(s)) => {
            *value = CellValue::Text(strip_trailing_nul(s));
        }
        (ColumnKind::Json, CellValue::Json(j)) => {
            if let Some(bad) = json_rejects_bigint(j) {
                return Err(IndexerError::BigIntSerializationError { column: column.to_string(), value: bad });
            }
        }
        (ColumnKind::Enum(variants), CellValue::Text(s)) => {
            if !variants.iter().any(|v| v == s) {
                return Err(IndexerError::IndexingDBError(format!(
                    "value '{s}' for enum column '{column}' is not one of {variants:?}"
                )));
            }
        }
        _ => {}
    }
    Ok(())
}
