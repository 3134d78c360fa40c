//! The RPC-facing boundary the sync engine drives. Actual JSON-RPC
//! transport (batching, retries, provider failover) is out of scope —
//! this module only defines the trait and the plain data it returns,
//! reusing `evindex-events::raw` types so a fetched batch can flow
//! straight into `build_events` without a second conversion layer.

use async_trait::async_trait;

use evindex_core::error::IndexerError;
use evindex_events::raw::{RawLog, RawReceipt, RawTransaction};

use crate::light_block::LightBlock;

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_latest_block(&self, chain_id: u64) -> Result<LightBlock, IndexerError>;

    async fn get_finalized_block(&self, chain_id: u64) -> Result<LightBlock, IndexerError>;

    async fn get_block_by_hash(&self, chain_id: u64, hash: &str) -> Result<Option<LightBlock>, IndexerError>;

    async fn get_block_by_number(&self, chain_id: u64, number: u64) -> Result<Option<LightBlock>, IndexerError>;

    async fn get_logs(&self, chain_id: u64, from_block: u64, to_block: u64) -> Result<Vec<RawLog>, IndexerError>;

    async fn get_block_transactions(&self, chain_id: u64, block_number: u64) -> Result<Vec<RawTransaction>, IndexerError>;

    async fn get_transaction_receipt(&self, chain_id: u64, tx_hash: &str) -> Result<Option<RawReceipt>, IndexerError>;
}
