//! The read-only EVM client injected into every handler invocation. Sits
//! atop a generic RPC queue (`request(method, params)`); this module owns
//! only the five typed convenience methods and the `cache: "immutable"` /
//! non-existent-address-retry rules layered on top of it.

use async_trait::async_trait;

use evindex_core::error::IndexerError;

/// The raw RPC queue boundary: a single `request` method wide enough to
/// express every read the client needs. Transport, batching, and provider
/// failover are out of scope, same as `evindex_sync::RpcClient`.
#[async_trait]
pub trait RpcQueue: Send + Sync {
    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, IndexerError>;
}

/// Whether a call may be served from the immutable-value fast path
/// (`blockTag: "latest"`) instead of pinning the event's block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHint {
    /// Use the event's block number (default: correctness over speed).
    PerEvent,
    /// Use `blockTag: "latest"` — only valid for values that cannot change
    /// at the queried block once set, e.g. a fully deployed contract's
    /// bytecode.
    Immutable,
}

fn block_tag(hint: CacheHint, event_block_number: u64) -> serde_json::Value {
    match hint {
        CacheHint::PerEvent => serde_json::json!(format!("0x{event_block_number:x}")),
        CacheHint::Immutable => serde_json::json!("latest"),
    }
}

/// Read-only EVM client the runtime injects into handler context.
pub struct ReadOnlyEvmClient<Q: RpcQueue> {
    queue: Q,
}

impl<Q: RpcQueue> ReadOnlyEvmClient<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub async fn get_balance(&self, address: &str, block_number: u64, hint: CacheHint) -> Result<String, IndexerError> {
        let result = self
            .queue
            .request("eth_getBalance", serde_json::json!([address, block_tag(hint, block_number)]))
            .await?;
        as_string(&result)
    }

    pub async fn get_code(&self, address: &str, block_number: u64, hint: CacheHint) -> Result<String, IndexerError> {
        let result = self
            .queue
            .request("eth_getCode", serde_json::json!([address, block_tag(hint, block_number)]))
            .await?;
        as_string(&result)
    }

    pub async fn get_storage_at(&self, address: &str, slot: &str, block_number: u64, hint: CacheHint) -> Result<String, IndexerError> {
        let result = self
            .queue
            .request("eth_getStorageAt", serde_json::json!([address, slot, block_tag(hint, block_number)]))
            .await?;
        as_string(&result)
    }

    /// `eth_call` against `address` with the raw ABI-encoded `calldata`. A
    /// non-existent address returns `0x`; this retries once with identical
    /// arguments (masking brief RPC provider inconsistency) before the
    /// caller is handed the empty result.
    pub async fn read_contract(&self, address: &str, calldata: &str, block_number: u64, hint: CacheHint) -> Result<String, IndexerError> {
        let call = serde_json::json!({"to": address, "data": calldata});
        let tag = block_tag(hint, block_number);

        let first = self.queue.request("eth_call", serde_json::json!([call.clone(), tag.clone()])).await?;
        let first = as_string(&first)?;
        if first != "0x" {
            return Ok(first);
        }

        let retried = self.queue.request("eth_call", serde_json::json!([call, tag])).await?;
        as_string(&retried)
    }

    /// Batch of `read_contract`-shaped calls issued as one RPC round-trip.
    pub async fn multicall(&self, calls: Vec<(String, String)>, block_number: u64, hint: CacheHint) -> Result<Vec<String>, IndexerError> {
        let tag = block_tag(hint, block_number);
        let encoded: Vec<serde_json::Value> = calls.iter().map(|(to, data)| serde_json::json!({"to": to, "data": data})).collect();
        let result = self.queue.request("eth_call_multi", serde_json::json!([encoded, tag])).await?;
        let array = result.as_array().ok_or_else(|| IndexerError::Rpc("multicall result was not an array".into()))?;
        array.iter().map(as_string).collect()
    }
}

fn as_string(value: &serde_json::Value) -> Result<String, IndexerError> {
    value.as_str().map(str::to_string).ok_or_else(|| IndexerError::Rpc(format!("expected string RPC result, got {value}")))
}
