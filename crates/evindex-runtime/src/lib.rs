//! evindex-runtime — the indexing runtime: handler dispatch, per-event
//! context, cross-chain ordering regimes, include narrowing, progress
//! tracking, and the read-only EVM client injected into handlers.

pub mod client;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod handler;
pub mod include;
pub mod metrics;
pub mod ordering;
pub mod progress;

pub use client::{CacheHint, ReadOnlyEvmClient, RpcQueue};
pub use config::{Common, OrderingRegime, RetrySlot, RuntimeOptions, Shutdown};
pub use context::{HandlerContext, Phase};
pub use dispatch::{
    handle_reorg, process_historical_events, process_realtime_events, process_setup_events,
    ChainInfo, DispatchError,
};
pub use handler::{Handler, HandlerRegistry, SetupHandler};
pub use include::IncludeSet;
pub use metrics::Metrics;
pub use ordering::{global_progress_seconds, order_streams};
pub use progress::{ChainProgress, ProgressTracker};
