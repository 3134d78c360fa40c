//! Column-access-driven include narrowing.
//!
//! During backfill, every materialized row records which columns handlers
//! actually touch. Once enough events have been observed, the runtime swaps
//! the full column set for the observed union (plus the intrinsic keys the
//! pipeline itself needs), shrinking subsequent RPC fetches. Any later
//! access outside the narrowed set is an [`IndexerError::InvalidEventAccessError`]
//! rather than silently missing data.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use evindex_core::error::IndexerError;

pub struct IncludeSet {
    /// Keys the pipeline always needs regardless of handler behavior
    /// (primary key, checkpoint bookkeeping columns).
    intrinsic: HashSet<String>,
    observed: Mutex<HashSet<String>>,
    events_observed: AtomicU64,
    narrowed: Mutex<Option<HashSet<String>>>,
    threshold: u64,
}

impl IncludeSet {
    pub fn new(intrinsic: impl IntoIterator<Item = String>, threshold: u64) -> Self {
        Self {
            intrinsic: intrinsic.into_iter().collect(),
            observed: Mutex::new(HashSet::new()),
            events_observed: AtomicU64::new(0),
            narrowed: Mutex::new(None),
            threshold,
        }
    }

    /// Record one event's accessed columns. Crossing the threshold fixes
    /// the narrowed set; observations after that are ignored (the set is
    /// already advertised to the fetch layer and must stay stable).
    pub fn observe_event(&self, accessed: impl IntoIterator<Item = String>) {
        if self.narrowed.lock().unwrap().is_some() {
            return;
        }
        self.observed.lock().unwrap().extend(accessed);
        let seen = self.events_observed.fetch_add(1, Ordering::SeqCst) + 1;
        if seen >= self.threshold {
            let mut set = self.observed.lock().unwrap().clone();
            set.extend(self.intrinsic.iter().cloned());
            *self.narrowed.lock().unwrap() = Some(set);
        }
    }

    /// The narrowed column set, once fixed. `None` means "fetch everything"
    /// (still inside the observation window).
    pub fn narrowed(&self) -> Option<HashSet<String>> {
        self.narrowed.lock().unwrap().clone()
    }

    /// Validate a column access against the narrowed set.
    pub fn check_access(&self, table: &str, column: &str) -> Result<(), IndexerError> {
        let narrowed = self.narrowed.lock().unwrap();
        match narrowed.as_ref() {
            Some(set) if !set.contains(column) => Err(IndexerError::InvalidEventAccessError {
                table: table.to_string(),
                column: column.to_string(),
            }),
            _ => Ok(()),
        }
    }
}
