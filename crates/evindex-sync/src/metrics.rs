//! Per-chain sync metrics: `sync_block`, `realtime_reorg_total`,
//! `realtime_latency` — plain atomics behind a struct, the same idiom the
//! store's cache counters use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    sync_block: AtomicU64,
    blocks_processed: AtomicU64,
    reorg_total: AtomicU64,
    latency_secs: Mutex<Vec<u64>>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sync_block(&self, number: u64) {
        self.sync_block.store(number, Ordering::Relaxed);
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sync_block(&self) -> u64 {
        self.sync_block.load(Ordering::Relaxed)
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    pub fn record_reorg(&self) {
        self.reorg_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reorg_total(&self) -> u64 {
        self.reorg_total.load(Ordering::Relaxed)
    }

    /// Seconds between a block's timestamp and the moment the engine
    /// finished processing it.
    pub fn record_latency(&self, block_timestamp: u64) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.latency_secs.lock().unwrap().push(now.saturating_sub(block_timestamp));
    }

    pub fn latency_samples(&self) -> Vec<u64> {
        self.latency_secs.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorg_total_accumulates() {
        let metrics = SyncMetrics::new();
        metrics.record_reorg();
        metrics.record_reorg();
        assert_eq!(metrics.reorg_total(), 2);
    }

    #[test]
    fn sync_block_tracks_latest_and_counts_processed() {
        let metrics = SyncMetrics::new();
        metrics.set_sync_block(100);
        metrics.set_sync_block(101);
        assert_eq!(metrics.sync_block(), 101);
        assert_eq!(metrics.blocks_processed(), 2);
    }
}
