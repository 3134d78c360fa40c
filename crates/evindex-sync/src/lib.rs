//! evindex-sync — the realtime sync engine: per-chain local chain tracking,
//! reorg recovery, the bloom fast-path, and the four-transition block
//! worker that emits `checkpoint`/`finalize`/`reorg` events to the runtime.

pub mod bloom;
pub mod engine;
pub mod light_block;
pub mod metrics;
pub mod reorg;
pub mod rpc;
pub mod service;
pub mod store;

pub use bloom::Bloom;
pub use engine::{SyncConfig, SyncEngine, SyncEvent, Transition, BACKOFF_SCHEDULE_SECS, MAX_QUEUED_BLOCKS};
pub use light_block::{LightBlock, LocalChain};
pub use metrics::SyncMetrics;
pub use reorg::ReorgOutcome;
pub use rpc::RpcClient;
pub use service::SyncServiceHandle;
pub use store::{MemorySyncStore, RealtimeBlockData, SyncStore};
