//! Per-chain indexing progress and ETA.
//!
//! A chain's progress is the fraction of its `[start_block, target_block]`
//! range already dispatched; the ETA extrapolates the observed block rate.
//! Under the multichain regime the slowest chain bounds the global figure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use evindex_core::types::EventCount;

#[derive(Debug, Clone)]
pub struct ChainProgress {
    pub start_block: u64,
    pub target_block: u64,
    pub current_block: u64,
    started: Instant,
}

impl ChainProgress {
    pub fn new(start_block: u64, target_block: u64) -> Self {
        Self { start_block, target_block, current_block: start_block, started: Instant::now() }
    }

    pub fn record_block(&mut self, block_number: u64) {
        if block_number > self.current_block {
            self.current_block = block_number;
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        let total = self.target_block.saturating_sub(self.start_block);
        if total == 0 {
            return 1.0;
        }
        let done = self.current_block.saturating_sub(self.start_block);
        (done as f64 / total as f64).min(1.0)
    }

    /// Extrapolated time to reach `target_block` at the observed rate.
    /// `None` until at least one block of progress exists.
    pub fn eta(&self) -> Option<Duration> {
        let done = self.current_block.saturating_sub(self.start_block);
        if done == 0 {
            return None;
        }
        let elapsed = self.started.elapsed();
        let remaining = self.target_block.saturating_sub(self.current_block);
        let per_block = elapsed.as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(per_block * remaining as f64))
    }
}

/// Tracks every chain's progress plus the per-handler event counts, behind
/// one lock so a progress snapshot is internally consistent.
#[derive(Default)]
pub struct ProgressTracker {
    per_chain: Mutex<HashMap<u64, ChainProgress>>,
    event_count: Mutex<EventCount>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_chain(&self, chain_id: u64, start_block: u64, target_block: u64) {
        self.per_chain.lock().unwrap().insert(chain_id, ChainProgress::new(start_block, target_block));
    }

    pub fn record_block(&self, chain_id: u64, block_number: u64) {
        if let Some(progress) = self.per_chain.lock().unwrap().get_mut(&chain_id) {
            progress.record_block(block_number);
        }
    }

    pub fn record_event(&self, handler_name: &str) {
        *self.event_count.lock().unwrap().entry(handler_name.to_string()).or_insert(0) += 1;
    }

    pub fn event_count(&self, handler_name: &str) -> u64 {
        self.event_count.lock().unwrap().get(handler_name).copied().unwrap_or(0)
    }

    pub fn chain_fraction(&self, chain_id: u64) -> Option<f64> {
        self.per_chain.lock().unwrap().get(&chain_id).map(ChainProgress::fraction)
    }

    /// The slowest chain's fraction — what a global progress bar shows.
    pub fn global_fraction(&self) -> Option<f64> {
        let per_chain = self.per_chain.lock().unwrap();
        per_chain.values().map(ChainProgress::fraction).min_by(|a, b| a.total_cmp(b))
    }

    pub fn chain_eta(&self, chain_id: u64) -> Option<Duration> {
        self.per_chain.lock().unwrap().get(&chain_id).and_then(ChainProgress::eta)
    }
}
