//! The runtime's metrics surface, as plain `AtomicU64`/`AtomicBool`
//! counters and gauges behind a struct — the same "no metrics crate
//! dependency" idiom `evindex_store::cache::CacheMetrics` uses, kept
//! consistent across the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// `indexing_completed_events{event}`, `indexing_function_duration{event}`,
/// `indexing_has_error`, `indexing_timestamp{chain}`,
/// `indexing_completed_seconds`, `sync_block{chain}`,
/// `sync_is_realtime{chain}`, `sync_is_complete{chain}`,
/// `realtime_reorg_total{chain}`, `realtime_latency{chain}`,
/// `rpc_request_duration{chain,method}`,
/// `rpc_request_error_total{chain,method}`,
/// `database_method_duration{service,method}`.
#[derive(Default)]
pub struct Metrics {
    completed_events: Mutex<HashMap<String, u64>>,
    function_duration_millis: Mutex<HashMap<String, Vec<u64>>>,
    has_error: AtomicBool,
    indexing_timestamp: Mutex<HashMap<u64, u64>>,
    indexing_completed_seconds: AtomicU64,
    sync_block: Mutex<HashMap<u64, u64>>,
    sync_is_realtime: Mutex<HashMap<u64, bool>>,
    sync_is_complete: Mutex<HashMap<u64, bool>>,
    realtime_reorg_total: Mutex<HashMap<u64, u64>>,
    realtime_latency_secs: Mutex<HashMap<u64, Vec<u64>>>,
    rpc_request_duration_millis: Mutex<HashMap<(u64, String), Vec<u64>>>,
    rpc_request_error_total: Mutex<HashMap<(u64, String), u64>>,
    database_method_duration_millis: Mutex<HashMap<(String, String), Vec<u64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed_event(&self, handler_name: &str) {
        *self.completed_events.lock().unwrap().entry(handler_name.to_string()).or_insert(0) += 1;
    }

    pub fn completed_events(&self, handler_name: &str) -> u64 {
        *self.completed_events.lock().unwrap().get(handler_name).unwrap_or(&0)
    }

    pub fn record_function_duration(&self, handler_name: &str, millis: u64) {
        self.function_duration_millis.lock().unwrap().entry(handler_name.to_string()).or_default().push(millis);
    }

    pub fn set_has_error(&self, has_error: bool) {
        self.has_error.store(has_error, Ordering::SeqCst);
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn set_indexing_timestamp(&self, chain_id: u64, timestamp: u64) {
        self.indexing_timestamp.lock().unwrap().insert(chain_id, timestamp);
    }

    pub fn set_indexing_completed_seconds(&self, seconds: u64) {
        self.indexing_completed_seconds.store(seconds, Ordering::SeqCst);
    }

    pub fn indexing_completed_seconds(&self) -> u64 {
        self.indexing_completed_seconds.load(Ordering::SeqCst)
    }

    pub fn set_sync_block(&self, chain_id: u64, block_number: u64) {
        self.sync_block.lock().unwrap().insert(chain_id, block_number);
    }

    pub fn sync_block(&self, chain_id: u64) -> Option<u64> {
        self.sync_block.lock().unwrap().get(&chain_id).copied()
    }

    pub fn set_sync_is_realtime(&self, chain_id: u64, is_realtime: bool) {
        self.sync_is_realtime.lock().unwrap().insert(chain_id, is_realtime);
    }

    pub fn set_sync_is_complete(&self, chain_id: u64, is_complete: bool) {
        self.sync_is_complete.lock().unwrap().insert(chain_id, is_complete);
    }

    pub fn record_reorg(&self, chain_id: u64) {
        *self.realtime_reorg_total.lock().unwrap().entry(chain_id).or_insert(0) += 1;
    }

    pub fn reorg_total(&self, chain_id: u64) -> u64 {
        *self.realtime_reorg_total.lock().unwrap().get(&chain_id).unwrap_or(&0)
    }

    pub fn record_realtime_latency(&self, chain_id: u64, secs: u64) {
        self.realtime_latency_secs.lock().unwrap().entry(chain_id).or_default().push(secs);
    }

    pub fn record_rpc_request(&self, chain_id: u64, method: &str, millis: u64) {
        self.rpc_request_duration_millis
            .lock()
            .unwrap()
            .entry((chain_id, method.to_string()))
            .or_default()
            .push(millis);
    }

    pub fn record_rpc_error(&self, chain_id: u64, method: &str) {
        *self.rpc_request_error_total.lock().unwrap().entry((chain_id, method.to_string())).or_insert(0) += 1;
    }

    pub fn rpc_error_total(&self, chain_id: u64, method: &str) -> u64 {
        *self
            .rpc_request_error_total
            .lock()
            .unwrap()
            .get(&(chain_id, method.to_string()))
            .unwrap_or(&0)
    }

    pub fn record_database_method(&self, service: &str, method: &str, millis: u64) {
        self.database_method_duration_millis
            .lock()
            .unwrap()
            .entry((service.to_string(), method.to_string()))
            .or_default()
            .push(millis);
    }
}
