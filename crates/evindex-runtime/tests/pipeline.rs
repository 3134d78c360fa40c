//! End-to-end pipeline integration tests.
//!
//! Each test drives a raw chain batch through the full path — build,
//! decode, split, dispatch — against an in-memory indexing store, then
//! asserts on what actually reached the backend (and on what a reorg
//! rolls back).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use evindex_core::error::IndexerError;
use evindex_core::filter::{AddressSet, BlockWindow, FactoryIndex, LogFilter};
use evindex_core::types::{DecodedLog, DecodedTrace, Event};
use evindex_core::Hex;
use evindex_events::{build_events, decode_events, split_events, AbiDecoder, ChainBatch, DecodeError, EventCallback, RawBlock, RawLog};
use evindex_runtime::{
    handle_reorg, process_historical_events, Common, Handler, HandlerContext, HandlerRegistry,
    RuntimeOptions,
};
use evindex_store::{CellValue, ColumnKind, ColumnSpec, IndexingStore, MemoryBackend, TableSpec};

// ─── Helpers ──────────────────────────────────────────────────────────────────

struct PassthroughDecoder;

impl AbiDecoder for PassthroughDecoder {
    fn decode_log(&self, _idx: usize, _address: &str, topics: &[String], _data: &str) -> Result<DecodedLog, DecodeError> {
        Ok(DecodedLog {
            event_name: "Transfer".into(),
            args: serde_json::json!({ "topic0": topics.first() }),
        })
    }

    fn decode_trace(&self, _idx: usize, _input: &str, _output: Option<&str>) -> Result<DecodedTrace, DecodeError> {
        Ok(DecodedTrace { function_name: "unused".into(), args: serde_json::json!({}), result: None })
    }
}

/// Counts transfers per emitting address into the `account` table.
struct CountTransfers(Arc<IndexingStore<MemoryBackend>>);

#[async_trait]
impl Handler for CountTransfers {
    async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<(), IndexerError> {
        let address = event.raw.log.as_ref().expect("log event").address.to_string();
        self.0
            .insert_or_update(
                "account",
                BTreeMap::from([
                    ("address".to_string(), CellValue::Text(address)),
                    ("transfers".to_string(), CellValue::Int(1)),
                ]),
                |current| {
                    let count = match current.get("transfers") {
                        Some(CellValue::Int(n)) => *n,
                        _ => 0,
                    };
                    BTreeMap::from([("transfers".to_string(), CellValue::Int(count + 1))])
                },
            )
            .await
            .map(|_| ())
    }

    fn name(&self) -> &str {
        "Token:Transfer"
    }
}

fn account_store() -> Arc<IndexingStore<MemoryBackend>> {
    let table = TableSpec::new("account", "address")
        .column("address", ColumnSpec::new(ColumnKind::Text).primary_key())
        .column("transfers", ColumnSpec::new(ColumnKind::Integer).not_null());
    Arc::new(IndexingStore::new(Arc::new(MemoryBackend::new()), vec![table]))
}

fn raw_block(number: u64) -> RawBlock {
    RawBlock {
        number,
        hash: Hex::new(format!("0xblock{number}")),
        parent_hash: Hex::new(format!("0xblock{}", number.saturating_sub(1))),
        timestamp: 1_700_000_000 + number * 12,
        logs_bloom: vec![0; 256],
    }
}

fn transfer_log(block_number: u64, address: &str, log_index: u64) -> RawLog {
    RawLog {
        address: Hex::new(address),
        topics: vec![Hex::new("0xtransfer")],
        data: "0x".into(),
        block_number,
        transaction_hash: Hex::new(format!("0xtx{block_number}-{log_index}")),
        transaction_index: 0,
        log_index,
        removed: false,
    }
}

fn transfer_callbacks() -> Vec<EventCallback> {
    vec![EventCallback::Log {
        filter: LogFilter {
            chain_id: 1,
            addresses: AddressSet::Fixed(vec!["0xtoken".into()]),
            topics: [Some(vec!["0xtransfer".into()]), None, None, None],
            window: BlockWindow::default(),
        },
        index: 0,
    }]
}

fn decoded_stream(batch: &ChainBatch) -> Vec<Event> {
    let raw_events = build_events(1, batch, &transfer_callbacks(), &FactoryIndex::new()).unwrap();
    let (events, failures) = decode_events(raw_events, &PassthroughDecoder);
    assert!(failures.is_empty());
    events
}

// ─── Build → decode → split → dispatch ────────────────────────────────────────

#[tokio::test]
async fn batch_flows_through_to_the_backend() {
    let batch = ChainBatch {
        blocks: vec![raw_block(1), raw_block(2)],
        logs: vec![
            transfer_log(1, "0xtoken", 0),
            transfer_log(2, "0xtoken", 0),
            transfer_log(2, "0xtoken", 1),
            transfer_log(2, "0xother", 2), // filtered out
        ],
        ..Default::default()
    };

    let events = decoded_stream(&batch);
    assert_eq!(events.len(), 3);

    let groups = split_events(events.clone());
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].events.len(), 1);
    assert_eq!(groups[1].events.len(), 2);

    let store = account_store();
    let mut registry = HandlerRegistry::new();
    registry.register(0, Arc::new(CountTransfers(store.clone())));
    let common = Common::new(RuntimeOptions::default());

    let dispatched = process_historical_events(&registry, &common, "ethereum", &events, &store, None).await.unwrap();
    assert_eq!(dispatched, 3);
    assert_eq!(common.metrics.completed_events("Token:Transfer"), 3);

    // Dropping the cache proves the flush reached the backend.
    store.clear();
    let row = store.find("account", "0xtoken").await.unwrap().unwrap();
    assert_eq!(row.get("transfers"), Some(&CellValue::Int(3)));
    assert!(store.find("account", "0xother").await.unwrap().is_none());
}

#[tokio::test]
async fn events_arrive_in_strict_checkpoint_order() {
    let batch = ChainBatch {
        blocks: vec![raw_block(2), raw_block(1)],
        logs: vec![
            transfer_log(2, "0xtoken", 1),
            transfer_log(1, "0xtoken", 0),
            transfer_log(2, "0xtoken", 0),
        ],
        ..Default::default()
    };

    let events = decoded_stream(&batch);
    assert!(events.windows(2).all(|w| w[0].checkpoint() < w[1].checkpoint()));
    assert_eq!(events[0].raw.block.number, 1);
}

// ─── Reorg rollback ───────────────────────────────────────────────────────────

#[tokio::test]
async fn reorg_rolls_back_exactly_the_unsafe_suffix() {
    let store = account_store();
    let mut registry = HandlerRegistry::new();
    registry.register(0, Arc::new(CountTransfers(store.clone())));
    let common = Common::new(RuntimeOptions::default());

    // Block 1 flushes first; block 2 flushes at a later checkpoint.
    let safe_batch = ChainBatch { blocks: vec![raw_block(1)], logs: vec![transfer_log(1, "0xtoken", 0)], ..Default::default() };
    let unsafe_batch = ChainBatch {
        blocks: vec![raw_block(2)],
        logs: vec![transfer_log(2, "0xtoken", 0), transfer_log(2, "0xtoken", 1)],
        ..Default::default()
    };

    let safe_events = decoded_stream(&safe_batch);
    process_historical_events(&registry, &common, "ethereum", &safe_events, &store, None).await.unwrap();
    let unsafe_events = decoded_stream(&unsafe_batch);
    process_historical_events(&registry, &common, "ethereum", &unsafe_events, &store, None).await.unwrap();

    let row = store.find("account", "0xtoken").await.unwrap().unwrap();
    assert_eq!(row.get("transfers"), Some(&CellValue::Int(3)));

    // Roll back to the end of block 1.
    let safe_checkpoint = safe_events.last().unwrap().checkpoint().clone();
    handle_reorg(&common, &store, 1, safe_checkpoint.as_str()).await.unwrap();

    let row = store.find("account", "0xtoken").await.unwrap().unwrap();
    assert_eq!(row.get("transfers"), Some(&CellValue::Int(1)));
    assert_eq!(common.metrics.reorg_total(1), 1);
}
