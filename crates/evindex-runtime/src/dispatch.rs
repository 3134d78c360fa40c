//! Dispatch: the three public entry points (`process_setup_events`,
//! `process_historical_events`, `process_realtime_events`) and the
//! per-event dispatch loop: look up handlers by key, await each in turn,
//! propagate the first error. Each event in the loop goes through five
//! steps: count, build context, await the handler, annotate any error
//! with the offending event, and yield periodically.
//!
//! The indexing store rides along: historical batches flush once at the
//! end, realtime batches flush at their (block-aligned) end, and a reorg
//! rolls the store back to the safe checkpoint and drops the cache.

use std::time::Instant;

use evindex_core::checkpoint::{Checkpoint, CheckpointParts, EventType};
use evindex_core::error::IndexerError;
use evindex_core::types::Event;
use evindex_store::{Backend, IndexingStore};
use tracing::{error, info, warn};

use crate::config::Common;
use crate::context::{HandlerContext, Phase};
use crate::handler::HandlerRegistry;
use crate::include::IncludeSet;

/// One chain's identity for `processSetupEvents`/progress reporting.
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub chain_name: String,
    pub start_block: u64,
}

/// An error raised from inside a handler, annotated with the event that
/// triggered it — the closest Rust equivalent of "rewrite the stack trace
/// to the first frame inside user source": instead of mutating a captured
/// backtrace, the event's identifying fields travel with the error so a
/// log consumer can locate the offending handler invocation without a
/// stack trace at all.
#[derive(Debug, thiserror::Error)]
#[error("handler failed at checkpoint {checkpoint} (chain {chain_id}, block {block_number}): {source}")]
pub struct DispatchError {
    pub chain_id: u64,
    pub block_number: u64,
    pub checkpoint: Checkpoint,
    #[source]
    pub source: IndexerError,
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        self.source.is_fatal()
    }
}

fn setup_checkpoint(chain_id: u64, start_block: u64) -> Checkpoint {
    Checkpoint::encode(CheckpointParts {
        block_timestamp: 0,
        chain_id,
        block_number: start_block,
        transaction_index: 0,
        event_type: EventType::Block,
        event_index: 0,
    })
}

/// Invoke every registered setup handler once per chain, with context
/// pinned at `{chainId, blockNumber=startBlock, checkpoint≈ZERO}`, then
/// flush each chain's setup writes at that checkpoint.
pub async fn process_setup_events<B: Backend>(
    registry: &HandlerRegistry,
    chains: &[ChainInfo],
    store: &IndexingStore<B>,
) -> Result<(), DispatchError> {
    for chain in chains {
        let checkpoint = setup_checkpoint(chain.chain_id, chain.start_block);
        let ctx = HandlerContext::for_event(chain.chain_id, &chain.chain_name, chain.start_block, checkpoint.clone(), Phase::Historical);
        for handler in registry.setup_handlers() {
            handler.setup(&ctx).await.map_err(|source| DispatchError {
                chain_id: chain.chain_id,
                block_number: chain.start_block,
                checkpoint: checkpoint.clone(),
                source,
            })?;
        }
        store.flush(checkpoint.as_str()).await.map_err(|source| DispatchError {
            chain_id: chain.chain_id,
            block_number: chain.start_block,
            checkpoint: checkpoint.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Consume a historical batch. The cache flushes once, at the end of the
/// batch. When `include` is given, every event's observed column accesses
/// feed it, and once it narrows, the store rejects out-of-set accesses.
pub async fn process_historical_events<B: Backend>(
    registry: &HandlerRegistry,
    common: &Common,
    chain_name: &str,
    events: &[Event],
    store: &IndexingStore<B>,
    include: Option<&IncludeSet>,
) -> Result<u64, DispatchError> {
    let mut dispatched = 0u64;
    for event in events {
        if common.shutdown.is_requested() {
            break;
        }
        dispatch_one(registry, common, chain_name, event, Phase::Historical, store, include).await?;
        dispatched += 1;
        maybe_yield(common, dispatched, event).await;
    }
    flush_batch(common, events.last(), store).await?;
    Ok(dispatched)
}

/// Consume an already-ordered realtime batch (produced by the sync
/// service + event pipeline). Same dispatch as historical, but the flush
/// happens per batch — realtime batches are block-aligned, so the store
/// is durable at every block boundary. No narrowing applies; realtime
/// uses whatever include set backfill converged on.
pub async fn process_realtime_events<B: Backend>(
    registry: &HandlerRegistry,
    common: &Common,
    chain_name: &str,
    events: &[Event],
    store: &IndexingStore<B>,
) -> Result<u64, DispatchError> {
    let mut dispatched = 0u64;
    for event in events {
        if common.shutdown.is_requested() {
            break;
        }
        dispatch_one(registry, common, chain_name, event, Phase::Realtime, store, None).await?;
        dispatched += 1;
        maybe_yield(common, dispatched, event).await;
    }
    flush_batch(common, events.last(), store).await?;
    Ok(dispatched)
}

/// React to a `reorg` event from the sync service: roll the store back to
/// `safe_checkpoint` and drop cached work past it. Events above the safe
/// checkpoint replay through the normal dispatch path afterwards.
pub async fn handle_reorg<B: Backend>(
    common: &Common,
    store: &IndexingStore<B>,
    chain_id: u64,
    safe_checkpoint: &str,
) -> Result<(), IndexerError> {
    info!(chain_id, safe_checkpoint, "rolling back indexed state for reorg");
    store.rollback_to(safe_checkpoint).await?;
    common.metrics.record_reorg(chain_id);
    Ok(())
}

async fn flush_batch<B: Backend>(common: &Common, last: Option<&Event>, store: &IndexingStore<B>) -> Result<(), DispatchError> {
    let Some(last) = last else { return Ok(()) };
    if common.shutdown.is_requested() {
        return Ok(());
    }
    let started = Instant::now();
    store.flush(last.checkpoint().as_str()).await.map_err(|source| DispatchError {
        chain_id: last.chain_id(),
        block_number: last.raw.block.number,
        checkpoint: last.checkpoint().clone(),
        source,
    })?;
    common
        .metrics
        .record_database_method("indexing_store", "flush", started.elapsed().as_millis() as u64);
    Ok(())
}

/// Every `options.yield_every_events` dispatches, yield to the scheduler
/// and update the per-chain progress timestamp.
async fn maybe_yield(common: &Common, dispatched: u64, event: &Event) {
    if dispatched % common.options.yield_every_events == 0 {
        common.metrics.set_indexing_timestamp(event.chain_id(), event.raw.block.number);
        tokio::task::yield_now().await;
    }
}

async fn dispatch_one<B: Backend>(
    registry: &HandlerRegistry,
    common: &Common,
    chain_name: &str,
    event: &Event,
    phase: Phase,
    store: &IndexingStore<B>,
    include: Option<&IncludeSet>,
) -> Result<(), DispatchError> {
    let chain_id = event.chain_id();
    let block_number = event.raw.block.number;
    let checkpoint = event.checkpoint().clone();
    let label = registry.label_for(event.raw.event_callback_index);

    if let Some(include) = include {
        store.set_allowed_columns(include.narrowed());
    }

    let ctx = HandlerContext::for_event(chain_id, chain_name, block_number, checkpoint.clone(), phase);

    let started = Instant::now();
    let result = registry.dispatch(event, &ctx).await;
    let elapsed_millis = started.elapsed().as_millis() as u64;

    let accessed = store.take_accessed_columns();
    match result {
        Ok(()) => {
            if let Some(include) = include {
                include.observe_event(accessed);
            }
            common.retry_slot.clear_if_matches(checkpoint.as_str());
            common.metrics.record_completed_event(&label);
            common.metrics.record_function_duration(&label, elapsed_millis);
            Ok(())
        }
        Err(source) => {
            let err = DispatchError { chain_id, block_number, checkpoint, source };
            if err.is_fatal() {
                error!(chain_id, block_number, handler = %label, "fatal dispatch error: {err}");
                common.metrics.set_has_error(true);
            } else {
                warn!(chain_id, block_number, handler = %label, "retryable dispatch error: {err}");
                common.retry_slot.set(err.checkpoint.as_str(), &err.to_string());
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeOptions;
    use crate::handler::Handler;
    use async_trait::async_trait;
    use evindex_core::types::{EventBlock, EventPayload, Hex, RawEvent};
    use evindex_store::{CellValue, ColumnKind, ColumnSpec, MemoryBackend, TableSpec};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct AlwaysOk(Arc<AtomicU32>);
    #[async_trait]
    impl Handler for AlwaysOk {
        async fn handle(&self, _event: &Event, _ctx: &HandlerContext) -> Result<(), IndexerError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn name(&self) -> &str {
            "Token:Transfer"
        }
    }

    struct AlwaysFatal;
    #[async_trait]
    impl Handler for AlwaysFatal {
        async fn handle(&self, _event: &Event, _ctx: &HandlerContext) -> Result<(), IndexerError> {
            Err(IndexerError::NotNullConstraintError { table: "transfers".into(), column: "amount".into() })
        }
        fn name(&self) -> &str {
            "Token:Bad"
        }
    }

    struct AlwaysTransient;
    #[async_trait]
    impl Handler for AlwaysTransient {
        async fn handle(&self, _event: &Event, _ctx: &HandlerContext) -> Result<(), IndexerError> {
            Err(IndexerError::Rpc("connection reset".into()))
        }
        fn name(&self) -> &str {
            "Token:Flaky"
        }
    }

    /// Writes a row through a shared store — exercises the flush path.
    struct WritesRow(Arc<IndexingStore<MemoryBackend>>);
    #[async_trait]
    impl Handler for WritesRow {
        async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<(), IndexerError> {
            self.0
                .insert(
                    "account",
                    BTreeMap::from([
                        ("address".to_string(), CellValue::Text(format!("0x{}", event.raw.block.number))),
                        ("balance".to_string(), CellValue::Int(1)),
                    ]),
                )
                .await
                .map(|_| ())
        }
        fn name(&self) -> &str {
            "Account:Seen"
        }
    }

    fn test_store() -> Arc<IndexingStore<MemoryBackend>> {
        let table = TableSpec::new("account", "address")
            .column("address", ColumnSpec::new(ColumnKind::Text).primary_key())
            .column("balance", ColumnSpec::new(ColumnKind::BigInt).not_null());
        Arc::new(IndexingStore::new(Arc::new(MemoryBackend::new()), vec![table]))
    }

    fn sample_event(callback_index: usize, block_number: u64) -> Event {
        let checkpoint = Checkpoint::encode(CheckpointParts {
            block_timestamp: 1,
            chain_id: 1,
            block_number,
            transaction_index: 0,
            event_type: EventType::Log,
            event_index: 0,
        });
        Event {
            raw: RawEvent {
                chain_id: 1,
                event_callback_index: callback_index,
                checkpoint,
                kind: EventType::Log,
                block: EventBlock { number: block_number, hash: Hex::new("0xa"), timestamp: 1 },
                transaction: None,
                transaction_receipt: None,
                log: None,
                trace: None,
            },
            payload: EventPayload::Block,
        }
    }

    #[tokio::test]
    async fn process_historical_events_dispatches_every_event() {
        let count = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(AlwaysOk(count.clone())));
        let common = Common::new(RuntimeOptions::default());
        let store = test_store();

        let events = vec![sample_event(0, 1), sample_event(0, 2), sample_event(0, 3)];
        let dispatched = process_historical_events(&registry, &common, "ethereum", &events, &store, None).await.unwrap();

        assert_eq!(dispatched, 3);
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(common.metrics.completed_events("Token:Transfer"), 3);
    }

    #[tokio::test]
    async fn fatal_handler_error_sets_has_error_and_stops_the_batch() {
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(AlwaysFatal));
        let common = Common::new(RuntimeOptions::default());
        let store = test_store();

        let events = vec![sample_event(0, 1), sample_event(0, 2)];
        let result = process_historical_events(&registry, &common, "ethereum", &events, &store, None).await;

        assert!(result.is_err());
        assert!(common.metrics.has_error());
    }

    #[tokio::test]
    async fn transient_handler_error_fills_the_retry_slot() {
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(AlwaysTransient));
        let common = Common::new(RuntimeOptions::default());
        let store = test_store();

        let events = vec![sample_event(0, 1)];
        let result = process_historical_events(&registry, &common, "ethereum", &events, &store, None).await;

        assert!(result.is_err());
        assert!(!common.metrics.has_error());
        let (checkpoint, _) = common.retry_slot.current().unwrap();
        assert_eq!(checkpoint, events[0].checkpoint().as_str());
    }

    #[tokio::test]
    async fn successful_retry_clears_the_retry_slot() {
        let count = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(AlwaysOk(count)));
        let common = Common::new(RuntimeOptions::default());
        let store = test_store();

        let events = vec![sample_event(0, 1)];
        common.retry_slot.set(events[0].checkpoint().as_str(), "rpc timeout");
        process_historical_events(&registry, &common, "ethereum", &events, &store, None).await.unwrap();
        assert!(common.retry_slot.current().is_none());
    }

    #[tokio::test]
    async fn historical_batch_flushes_handler_writes() {
        let store = test_store();
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(WritesRow(store.clone())));
        let common = Common::new(RuntimeOptions::default());

        let events = vec![sample_event(0, 1), sample_event(0, 2)];
        process_historical_events(&registry, &common, "ethereum", &events, &store, None).await.unwrap();

        // A cleared cache forces the next read through the backend — proof
        // the flush reached it.
        store.clear();
        let row = store.find("account", "0x1").await.unwrap().unwrap();
        assert_eq!(row.get("balance"), Some(&CellValue::Int(1)));
    }

    #[tokio::test]
    async fn include_set_observes_accesses_and_narrows() {
        let store = test_store();
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(WritesRow(store.clone())));
        let common = Common::new(RuntimeOptions::default());
        let include = IncludeSet::new(["address".to_string()], 2);

        let events = vec![sample_event(0, 1), sample_event(0, 2)];
        process_historical_events(&registry, &common, "ethereum", &events, &store, Some(&include)).await.unwrap();

        let narrowed = include.narrowed().unwrap();
        assert!(narrowed.contains("address"));
        assert!(narrowed.contains("balance"));
    }

    #[tokio::test]
    async fn reorg_rolls_the_store_back_and_counts() {
        let store = test_store();
        let common = Common::new(RuntimeOptions::default());
        store
            .insert(
                "account",
                BTreeMap::from([
                    ("address".to_string(), CellValue::Text("0xa".into())),
                    ("balance".to_string(), CellValue::Int(1)),
                ]),
            )
            .await
            .unwrap();
        store.flush("5").await.unwrap();

        handle_reorg(&common, &store, 1, "3").await.unwrap();

        assert!(store.find("account", "0xa").await.unwrap().is_none());
        assert_eq!(common.metrics.reorg_total(1), 1);
    }

    #[tokio::test]
    async fn shutdown_requested_stops_further_dispatch() {
        let count = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(AlwaysOk(count.clone())));
        let common = Common::new(RuntimeOptions::default());
        let store = test_store();
        common.shutdown.request();

        let events = vec![sample_event(0, 1), sample_event(0, 2)];
        let dispatched = process_historical_events(&registry, &common, "ethereum", &events, &store, None).await.unwrap();

        assert_eq!(dispatched, 0);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
