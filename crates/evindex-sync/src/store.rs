//! The sync store interface: the handful of operations the realtime sync
//! engine needs against persistent storage, kept separate from
//! `evindex_store::IndexingStore` because these rows are engine-owned
//! bookkeeping, not user-schema rows. An explicit trait boundary, rather
//! than keeping this state in memory only, so a restart can resume
//! mid-chain.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use evindex_core::error::IndexerError;
use evindex_events::raw::{RawLog, RawReceipt, RawTransaction};

use crate::light_block::LightBlock;

/// Everything a processed realtime block contributes to storage: the block
/// header, the transactions referenced by matched logs, their receipts
/// (when any filter requires them), and the matched logs themselves. The
/// store must persist the whole bundle atomically — a checkpoint event is
/// only emitted once the insert returns.
#[derive(Debug, Clone, Default)]
pub struct RealtimeBlockData {
    pub block: Option<LightBlock>,
    pub transactions: Vec<RawTransaction>,
    pub receipts: Vec<RawReceipt>,
    pub logs: Vec<RawLog>,
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Atomically insert a processed block's header, selected transactions,
    /// receipts, and matched logs.
    async fn insert_realtime_block(&self, chain_id: u64, data: RealtimeBlockData) -> Result<(), IndexerError>;

    async fn insert_factory_child_address_logs(
        &self,
        chain_id: u64,
        factory_id: &str,
        addresses: Vec<(String, u64)>,
    ) -> Result<(), IndexerError>;

    /// Record a closed `[from, to]` realtime interval once its blocks have
    /// been finalized and their events flushed.
    async fn insert_realtime_interval(&self, chain_id: u64, from_block: u64, to_block: u64) -> Result<(), IndexerError>;

    /// Drop all sync bookkeeping for `chain_id` at or above `from_block`
    /// (the storage-level counterpart of a reorg rewind).
    async fn delete_realtime_data(&self, chain_id: u64, from_block: u64) -> Result<(), IndexerError>;

    /// Child addresses of `factory_id` first seen within `[from_block,
    /// to_block]`, each paired with its discovery block.
    async fn get_factory_child_addresses(
        &self,
        chain_id: u64,
        factory_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(String, u64)>, IndexerError>;

    /// Cache of a prior RPC call result, keyed by an opaque request key
    /// (method + params digest) — lets a restarted engine avoid re-issuing
    /// an identical request for a block it already processed.
    async fn get_rpc_request_result(&self, request_key: &str) -> Result<Option<String>, IndexerError>;

    async fn insert_rpc_request_result(&self, request_key: &str, result: &str) -> Result<(), IndexerError>;
}

/// In-memory [`SyncStore`], the default used in tests and for chains that
/// don't need cross-restart resume.
#[derive(Default)]
pub struct MemorySyncStore {
    blocks: Mutex<HashMap<u64, Vec<RealtimeBlockData>>>,
    factory_children: Mutex<HashMap<(u64, String), Vec<(String, u64)>>>,
    intervals: Mutex<HashMap<u64, Vec<(u64, u64)>>>,
    rpc_cache: Mutex<HashMap<String, String>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored block bundles for `chain_id` — test observability.
    pub fn block_count(&self, chain_id: u64) -> usize {
        self.blocks.lock().unwrap().get(&chain_id).map_or(0, Vec::len)
    }

    /// Highest stored block number for `chain_id` — test observability.
    pub fn max_block_number(&self, chain_id: u64) -> Option<u64> {
        self.blocks
            .lock()
            .unwrap()
            .get(&chain_id)?
            .iter()
            .filter_map(|d| d.block.as_ref().map(|b| b.number))
            .max()
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn insert_realtime_block(&self, chain_id: u64, data: RealtimeBlockData) -> Result<(), IndexerError> {
        self.blocks.lock().unwrap().entry(chain_id).or_default().push(data);
        Ok(())
    }

    async fn insert_factory_child_address_logs(
        &self,
        chain_id: u64,
        factory_id: &str,
        addresses: Vec<(String, u64)>,
    ) -> Result<(), IndexerError> {
        self.factory_children
            .lock()
            .unwrap()
            .entry((chain_id, factory_id.to_string()))
            .or_default()
            .extend(addresses);
        Ok(())
    }

    async fn insert_realtime_interval(&self, chain_id: u64, from_block: u64, to_block: u64) -> Result<(), IndexerError> {
        self.intervals.lock().unwrap().entry(chain_id).or_default().push((from_block, to_block));
        Ok(())
    }

    async fn delete_realtime_data(&self, chain_id: u64, from_block: u64) -> Result<(), IndexerError> {
        if let Some(blocks) = self.blocks.lock().unwrap().get_mut(&chain_id) {
            blocks.retain(|d| d.block.as_ref().map_or(false, |b| b.number < from_block));
        }
        let mut children = self.factory_children.lock().unwrap();
        for ((cid, _), addresses) in children.iter_mut() {
            if *cid == chain_id {
                addresses.retain(|(_, discovered_at)| *discovered_at < from_block);
            }
        }
        Ok(())
    }

    async fn get_factory_child_addresses(
        &self,
        chain_id: u64,
        factory_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(String, u64)>, IndexerError> {
        Ok(self
            .factory_children
            .lock()
            .unwrap()
            .get(&(chain_id, factory_id.to_string()))
            .map(|addresses| {
                addresses
                    .iter()
                    .filter(|(_, discovered_at)| (from_block..=to_block).contains(discovered_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_rpc_request_result(&self, request_key: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.rpc_cache.lock().unwrap().get(request_key).cloned())
    }

    async fn insert_rpc_request_result(&self, request_key: &str, result: &str) -> Result<(), IndexerError> {
        self.rpc_cache.lock().unwrap().insert(request_key.to_string(), result.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64) -> RealtimeBlockData {
        RealtimeBlockData {
            block: Some(LightBlock {
                number,
                hash: format!("0x{number}"),
                parent_hash: format!("0x{}", number.saturating_sub(1)),
                timestamp: number,
                logs_bloom: "0x0".into(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delete_realtime_data_drops_blocks_at_or_above_cutoff() {
        let store = MemorySyncStore::new();
        for n in 100..=105 {
            store.insert_realtime_block(1, block(n)).await.unwrap();
        }
        store.delete_realtime_data(1, 103).await.unwrap();
        assert_eq!(store.block_count(1), 3);
        assert_eq!(store.max_block_number(1), Some(102));
    }

    #[tokio::test]
    async fn delete_realtime_data_also_drops_reorged_factory_children() {
        let store = MemorySyncStore::new();
        store
            .insert_factory_child_address_logs(1, "pool-factory", vec![("0xa".into(), 100), ("0xb".into(), 105)])
            .await
            .unwrap();
        store.delete_realtime_data(1, 103).await.unwrap();
        let children = store.get_factory_child_addresses(1, "pool-factory", 0, u64::MAX).await.unwrap();
        assert_eq!(children, vec![("0xa".to_string(), 100)]);
    }

    #[tokio::test]
    async fn factory_child_addresses_filter_by_block_window() {
        let store = MemorySyncStore::new();
        store
            .insert_factory_child_address_logs(1, "pool-factory", vec![("0xa".into(), 10), ("0xb".into(), 20)])
            .await
            .unwrap();
        let children = store.get_factory_child_addresses(1, "pool-factory", 15, 25).await.unwrap();
        assert_eq!(children, vec![("0xb".to_string(), 20)]);
    }

    #[tokio::test]
    async fn rpc_request_result_cache_roundtrips() {
        let store = MemorySyncStore::new();
        assert!(store.get_rpc_request_result("k1").await.unwrap().is_none());
        store.insert_rpc_request_result("k1", "result").await.unwrap();
        assert_eq!(store.get_rpc_request_result("k1").await.unwrap().as_deref(), Some("result"));
    }
}
