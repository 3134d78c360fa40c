//! The per-chain realtime sync engine: a single-consumer queue worker that
//! classifies each newly observed head against the local chain's tip into
//! one of four transitions (Identity/Backward/Gap/Linked), drives reorg
//! recovery, and emits `checkpoint`/`finalize`/`reorg` events to the
//! runtime. A poll-then-dispatch loop, generalized from "always call
//! `eth_getLogs`" to a bloom-gated fast path, with a sliding-window local
//! chain and per-block retry backoff.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, trace, warn};

use evindex_core::checkpoint::Checkpoint;
use evindex_core::error::IndexerError;
use evindex_core::filter::{BlockFilter, FactoryIndex, FactorySource, LogFilter};
use evindex_core::types::EventLog;
use evindex_events::raw::{RawLog, RawReceipt, RawTransaction};

use crate::bloom::{log_filter_is_plausible, Bloom};
use crate::light_block::{LightBlock, LocalChain};
use crate::metrics::SyncMetrics;
use crate::reorg;
use crate::rpc::RpcClient;
use crate::store::{RealtimeBlockData, SyncStore};

/// Hard cap on how many intermediate blocks a single gap is backfilled with
/// before the caller must fall back to the historical backfill path.
pub const MAX_QUEUED_BLOCKS: usize = 25;

/// Retry backoff schedule (seconds) for a failing block task. After
/// exhausting every entry for the same block number, the failure is fatal.
pub const BACKOFF_SCHEDULE_SECS: &[u64] = &[1, 2, 5, 10, 30, 60, 60];

/// An event emitted to the runtime as a consequence of processing a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Checkpoint { chain_id: u64, checkpoint: String },
    Finalize { chain_id: u64, checkpoint: String },
    Reorg { chain_id: u64, safe_checkpoint: String },
}

/// One of the four transitions a newly observed head can trigger, decided
/// purely from the relation between the chain's current tip and the new
/// head. No engine state is needed to classify a head — it's a pure
/// function of `(tip, new)` — but it's given an explicit enum here for
/// exhaustiveness-checked dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Identity,
    Backward,
    Gap,
    Linked,
}

impl Transition {
    pub fn classify(tip: Option<&LightBlock>, new: &LightBlock) -> Self {
        let Some(tip) = tip else { return Transition::Linked };
        if tip.hash.eq_ignore_ascii_case(&new.hash) {
            Transition::Identity
        } else if tip.number >= new.number {
            Transition::Backward
        } else if tip.number + 1 < new.number {
            Transition::Gap
        } else if new.extends(tip) {
            Transition::Linked
        } else {
            // `tip.number + 1 == new.number` but hashes don't chain: a
            // single-block reorg, handled the same way as Backward.
            Transition::Backward
        }
    }
}

/// Immutable per-chain configuration the engine is built from: the filter
/// set, factory seeds, and finality depth.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub chain_id: u64,
    pub finality_block_count: u64,
    pub log_filters: Vec<LogFilter>,
    pub block_filters: Vec<BlockFilter>,
    pub factory_sources: Vec<FactorySource>,
    /// Whether any registered filter needs transaction receipts (e.g. a
    /// transaction filter with `include_reverted = false`).
    pub receipts_required: bool,
}

/// Per-chain engine state: the local chain segment, the finalized pointer,
/// the factory child index, and the kill switch. Shared across the poll
/// task and the worker via `Arc`.
pub struct SyncEngine<R: RpcClient, S: SyncStore> {
    config: SyncConfig,
    rpc: Arc<R>,
    store: Arc<S>,
    factories: Mutex<FactoryIndex>,
    chain: Mutex<LocalChain>,
    finalized_block: AtomicU64,
    is_killed: AtomicBool,
    pub metrics: SyncMetrics,
}

impl<R: RpcClient, S: SyncStore> SyncEngine<R, S> {
    pub fn new(config: SyncConfig, rpc: Arc<R>, store: Arc<S>) -> Self {
        Self {
            config,
            rpc,
            store,
            factories: Mutex::new(FactoryIndex::new()),
            chain: Mutex::new(LocalChain::new()),
            finalized_block: AtomicU64::new(0),
            is_killed: AtomicBool::new(false),
            metrics: SyncMetrics::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn kill(&self) {
        self.is_killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.is_killed.load(Ordering::SeqCst)
    }

    pub fn finalized_block_number(&self) -> u64 {
        self.finalized_block.load(Ordering::SeqCst)
    }

    pub(crate) async fn rpc_latest_block(&self) -> Result<LightBlock, IndexerError> {
        self.rpc.get_latest_block(self.config.chain_id).await
    }

    /// Process one newly observed head, returning the events to emit. This
    /// is the queue worker's per-task body; the caller is responsible for
    /// feeding it from a single-consumer queue so only one head is ever in
    /// flight at a time.
    pub async fn on_new_head(&self, new: LightBlock) -> Result<Vec<SyncEvent>, IndexerError> {
        if self.is_killed() {
            return Ok(vec![]);
        }

        let tip = self.chain.lock().unwrap().tip().cloned();
        match Transition::classify(tip.as_ref(), &new) {
            Transition::Identity => {
                trace!(chain_id = self.config.chain_id, number = new.number, "head unchanged");
                Ok(vec![])
            }
            Transition::Backward => self.handle_reorg(new).await,
            Transition::Gap => self.handle_gap(new).await,
            Transition::Linked => self.handle_linked(new).await,
        }
    }

    async fn handle_gap(&self, new: LightBlock) -> Result<Vec<SyncEvent>, IndexerError> {
        let tip_number = self.chain.lock().unwrap().tip().map(|b| b.number);
        let Some(tip_number) = tip_number else {
            return self.handle_linked(new).await;
        };

        let span = (new.number - tip_number - 1).min(MAX_QUEUED_BLOCKS as u64);
        debug!(chain_id = self.config.chain_id, from = tip_number + 1, span, "filling block gap");

        let mut events = Vec::new();
        for number in (tip_number + 1)..(tip_number + 1 + span) {
            let block = self
                .rpc
                .get_block_by_number(self.config.chain_id, number)
                .await?
                .ok_or_else(|| IndexerError::Rpc(format!("gap-fill block {number} not found")))?;
            events.extend(self.handle_linked(block).await?);
        }
        events.extend(self.on_new_head_boxed(new).await?);
        Ok(events)
    }

    fn on_new_head_boxed<'a>(&'a self, new: LightBlock) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<SyncEvent>, IndexerError>> + Send + 'a>> {
        Box::pin(self.on_new_head(new))
    }

    async fn handle_reorg(&self, new: LightBlock) -> Result<Vec<SyncEvent>, IndexerError> {
        warn!(chain_id = self.config.chain_id, number = new.number, hash = %new.hash, "reorg detected");
        self.metrics.record_reorg();

        // The walk-back awaits RPC calls, so the chain is taken out of the
        // mutex for the duration and written back once recovery succeeds.
        // No other task touches this chain's state concurrently, since the
        // caller feeds this engine from a single-consumer queue.
        let mut chain = self.chain.lock().unwrap().clone();
        let outcome = reorg::recover(&mut chain, &new, self.rpc.as_ref(), self.config.chain_id).await?;
        *self.chain.lock().unwrap() = chain;

        self.store.delete_realtime_data(self.config.chain_id, outcome.common_ancestor.number + 1).await?;

        // Reorged-away factory children were deleted from the store; the
        // in-memory index is rebuilt lazily from what survived.
        {
            let mut factories = self.factories.lock().unwrap();
            *factories = FactoryIndex::new();
        }
        for source in &self.config.factory_sources {
            let survivors = self
                .store
                .get_factory_child_addresses(self.config.chain_id, &source.factory_id.0, 0, outcome.common_ancestor.number)
                .await?;
            let mut factories = self.factories.lock().unwrap();
            for (address, discovered_at) in survivors {
                factories.insert(source.factory_id.clone(), address, discovered_at);
            }
        }

        let safe_checkpoint =
            Checkpoint::max_of_block(outcome.common_ancestor.timestamp, self.config.chain_id, outcome.common_ancestor.number).to_string();

        Ok(vec![SyncEvent::Reorg { chain_id: self.config.chain_id, safe_checkpoint }])
    }

    /// The happy path: `new` extends the current tip. Fetch and filter this
    /// block's logs (bloom permitting), resolve factory children, select
    /// the transactions matched logs reference, persist the bundle, and
    /// emit `checkpoint` (plus `finalize` when the finality depth allows).
    async fn handle_linked(&self, new: LightBlock) -> Result<Vec<SyncEvent>, IndexerError> {
        let chain_id = self.config.chain_id;
        let bloom = Bloom::from_hex(&new.logs_bloom).unwrap_or_else(|_| Bloom::zero());

        // Skip `eth_getLogs` only when no factory source could be waiting
        // for children and the bloom rules out every installed log filter.
        let has_factory = !self.config.factory_sources.is_empty();
        let should_fetch_logs = has_factory || self.config.log_filters.iter().any(|f| log_filter_is_plausible(f, &bloom));

        let logs: Vec<RawLog> = if should_fetch_logs {
            let fetched = self.rpc.get_logs(chain_id, new.number, new.number).await?;
            if !bloom.is_zero() && fetched.is_empty() {
                return Err(IndexerError::Rpc(format!(
                    "bloom non-zero but eth_getLogs returned nothing for block {}",
                    new.number
                )));
            }
            fetched
        } else {
            trace!(chain_id, number = new.number, "bloom fast-path: skipping eth_getLogs");
            Vec::new()
        };

        // Factory children discovered in this block become matchable from
        // this block onward, including by later logs in the same block.
        self.resolve_factory_children(&logs, new.number).await?;

        let matched: Vec<RawLog> = {
            let factories = self.factories.lock().unwrap();
            logs.iter()
                .filter(|log| {
                    let event_log = to_event_log(log);
                    self.config.log_filters.iter().any(|f| f.matches(&event_log, new.number, &factories))
                })
                .cloned()
                .collect()
        };

        // Only the transactions matched logs reference are persisted, and
        // receipts only when some registered filter demands them.
        let mut transactions: Vec<RawTransaction> = Vec::new();
        let mut receipts: Vec<RawReceipt> = Vec::new();
        if !matched.is_empty() {
            let referenced: HashSet<&str> = matched.iter().map(|l| l.transaction_hash.as_str()).collect();
            transactions = self
                .rpc
                .get_block_transactions(chain_id, new.number)
                .await?
                .into_iter()
                .filter(|tx| referenced.contains(tx.hash.as_str()))
                .collect();

            if self.config.receipts_required {
                for tx in &transactions {
                    let receipt = self
                        .rpc
                        .get_transaction_receipt(chain_id, tx.hash.as_str())
                        .await?
                        .ok_or_else(|| IndexerError::MissingReceipt { tx_hash: tx.hash.to_string() })?;
                    receipts.push(receipt);
                }
            }
        }

        let block_matched = self.config.block_filters.iter().any(|f| f.matches(new.number));

        if !matched.is_empty() || block_matched {
            self.store
                .insert_realtime_block(
                    chain_id,
                    RealtimeBlockData { block: Some(new.clone()), transactions, receipts, logs: matched },
                )
                .await?;
        }

        let checkpoint = Checkpoint::max_of_block(new.timestamp, chain_id, new.number);
        let mut events = vec![SyncEvent::Checkpoint { chain_id, checkpoint: checkpoint.to_string() }];

        {
            let mut chain = self.chain.lock().unwrap();
            chain.push(new.clone());
        }
        self.metrics.set_sync_block(new.number);
        self.metrics.record_latency(new.timestamp);

        if let Some(finalize) = self.maybe_finalize(&new).await? {
            events.push(finalize);
        }

        Ok(events)
    }

    /// Extract newly announced factory children from `logs`, persist them,
    /// and make them matchable in the in-memory index.
    async fn resolve_factory_children(&self, logs: &[RawLog], block_number: u64) -> Result<(), IndexerError> {
        for source in &self.config.factory_sources {
            let children: Vec<(String, u64)> = logs
                .iter()
                .filter_map(|log| source.extract_child(&to_event_log(log)))
                .map(|address| (address, block_number))
                .collect();
            if children.is_empty() {
                continue;
            }
            debug!(
                chain_id = self.config.chain_id,
                factory = %source.factory_id.0,
                count = children.len(),
                block = block_number,
                "discovered factory children"
            );
            self.store
                .insert_factory_child_address_logs(self.config.chain_id, &source.factory_id.0, children.clone())
                .await?;
            let mut factories = self.factories.lock().unwrap();
            for (address, discovered_at) in children {
                factories.insert(source.factory_id.clone(), address, discovered_at);
            }
        }
        Ok(())
    }

    async fn maybe_finalize(&self, new: &LightBlock) -> Result<Option<SyncEvent>, IndexerError> {
        let finalized = self.finalized_block.load(Ordering::SeqCst);
        if new.number < finalized + 2 * self.config.finality_block_count {
            return Ok(None);
        }
        let pending_number = new.number - self.config.finality_block_count;
        let pending = {
            let chain = self.chain.lock().unwrap();
            chain.get(pending_number).cloned()
        };
        let Some(pending) = pending else { return Ok(None) };

        self.store.insert_realtime_interval(self.config.chain_id, finalized + 1, pending.number).await?;
        {
            let mut chain = self.chain.lock().unwrap();
            chain.prune_up_to(pending.number);
        }
        self.finalized_block.store(pending.number, Ordering::SeqCst);
        debug!(chain_id = self.config.chain_id, finalized = pending.number, "advanced finalized block");

        let checkpoint = Checkpoint::max_of_block(pending.timestamp, self.config.chain_id, pending.number);
        Ok(Some(SyncEvent::Finalize { chain_id: self.config.chain_id, checkpoint: checkpoint.to_string() }))
    }

    /// The retry loop around [`Self::on_new_head`]: on failure, sleep the
    /// next backoff entry and retry the same block; after exhausting the
    /// schedule, return the fatal error for the caller's `onFatalError`.
    /// Reorg and already-fatal errors are never retried.
    pub async fn on_new_head_with_retry(
        &self,
        new: LightBlock,
        sleep: impl Fn(Duration) -> futures::future::BoxFuture<'static, ()>,
    ) -> Result<Vec<SyncEvent>, IndexerError> {
        let mut attempt = 0usize;
        loop {
            if self.is_killed() {
                return Ok(vec![]);
            }
            match self.on_new_head(new.clone()).await {
                Ok(events) => return Ok(events),
                Err(err) if err.is_reorg() || err.is_fatal() => return Err(err),
                Err(err) if attempt >= BACKOFF_SCHEDULE_SECS.len() => {
                    return Err(IndexerError::Aborted { reason: format!("block {} failed {attempt} times: {err}", new.number) });
                }
                Err(err) => {
                    let secs = BACKOFF_SCHEDULE_SECS[attempt];
                    warn!(
                        chain_id = self.config.chain_id,
                        number = new.number,
                        attempt,
                        backoff_secs = secs,
                        "block processing failed, retrying: {err}"
                    );
                    sleep(Duration::from_secs(secs)).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn to_event_log(log: &RawLog) -> EventLog {
    EventLog {
        address: log.address.clone(),
        topics: log.topics.clone(),
        data: log.data.clone(),
        log_index: log.log_index,
        removed: log.removed,
    }
}
