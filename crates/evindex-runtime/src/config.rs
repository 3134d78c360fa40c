//! Runtime-wide configuration shared across every dispatch call: a plain
//! serde-derived config struct with a sensible `Default`, widened from
//! one chain's backfill knobs to a cross-chain `Common{metrics, options,
//! shutdown}` bundle threaded through every dispatch call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;

use crate::metrics::Metrics;

/// Cross-chain ordering regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderingRegime {
    /// A single global checkpoint-sorted stream across every chain.
    Omnichain,
    /// Independent streams per chain; progress is computed per chain and
    /// minimized for the global progress bar.
    Multichain,
}

impl Default for OrderingRegime {
    fn default() -> Self {
        Self::Omnichain
    }
}

/// Tunable knobs that aren't per-chain: the historical narrowing
/// threshold, the dispatch yield interval, and the ordering regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// After this many events in a historical batch, narrow
    /// `filter.include` to the observed column-access set.
    pub narrow_include_after_events: u64,
    /// Yield to the scheduler and update progress metrics every N events.
    pub yield_every_events: u64,
    pub ordering: OrderingRegime,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { narrow_include_after_events: 1000, yield_every_events: 93, ordering: OrderingRegime::default() }
    }
}

/// Cooperative shutdown flag, checked between events/handlers — a
/// long-running handler is never interrupted mid-flight, only between
/// dispatches.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The single-slot retryable error: holds the checkpoint and message of
/// the most recent transient failure, cleared when the same event later
/// succeeds. One slot suffices — dispatch is sequential, so at most one
/// event is ever mid-retry.
#[derive(Debug, Clone, Default)]
pub struct RetrySlot(Arc<std::sync::Mutex<Option<(String, String)>>>);

impl RetrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, checkpoint: &str, message: &str) {
        *self.0.lock().unwrap() = Some((checkpoint.to_string(), message.to_string()));
    }

    /// Clear the slot if it holds a failure for `checkpoint` (the event
    /// just retried successfully).
    pub fn clear_if_matches(&self, checkpoint: &str) {
        let mut slot = self.0.lock().unwrap();
        if slot.as_ref().is_some_and(|(cp, _)| cp == checkpoint) {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<(String, String)> {
        self.0.lock().unwrap().clone()
    }
}

/// The bundle passed to every dispatch entry point: `{metrics, options,
/// shutdown}` plus the retryable-error slot. Structured logging goes
/// through a `tracing` subscriber installed process-wide rather than a
/// bespoke logger type threaded through this struct.
pub struct Common {
    pub metrics: Arc<Metrics>,
    pub options: RuntimeOptions,
    pub shutdown: Shutdown,
    pub retry_slot: RetrySlot,
}

impl Common {
    pub fn new(options: RuntimeOptions) -> Self {
        Self { metrics: Arc::new(Metrics::new()), options, shutdown: Shutdown::new(), retry_slot: RetrySlot::new() }
    }

    /// Installs `subscriber` as the global default tracing subscriber for
    /// this process. A no-op-returning handle is deliberately not provided:
    /// callers that don't want structured logging simply don't call this.
    pub fn install_logger(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
        tracing::subscriber::set_global_default(subscriber)
    }
}

impl Default for Common {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_is_observable_after_request() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());
        shutdown.request();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn shutdown_clone_shares_the_same_flag() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        clone.request();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn retry_slot_clears_only_for_the_matching_checkpoint() {
        let slot = RetrySlot::new();
        slot.set("cp-1", "rpc timeout");
        slot.clear_if_matches("cp-2");
        assert!(slot.current().is_some());
        slot.clear_if_matches("cp-1");
        assert!(slot.current().is_none());
    }
}
