//! `build_events` — turns one chain's block-aligned batch into a
//! checkpoint-sorted slice of [`RawEvent`]s.

use std::collections::HashMap;

use evindex_core::checkpoint::{Checkpoint, CheckpointParts, EventType};
use evindex_core::filter::{BlockFilter, FactoryIndex, LogFilter, TraceFilter, TransactionFilter, TransferFilter};
use evindex_core::types::{EventBlock, EventLog, EventReceipt, EventTrace, EventTransaction, RawEvent};
use evindex_core::IndexerError;

use crate::raw::{ChainBatch, RawTrace};

/// One registered `(filter, callback index)` pair. `index` is the position
/// in the handler registry this filter belongs to, threaded straight
/// through to the emitted [`RawEvent::event_callback_index`].
#[derive(Debug, Clone)]
pub enum EventCallback {
    Block { filter: BlockFilter, index: usize },
    Transaction { filter: TransactionFilter, index: usize },
    Log { filter: LogFilter, index: usize },
    Trace { filter: TraceFilter, index: usize },
    Transfer { filter: TransferFilter, index: usize },
}

struct PartitionedCallbacks<'a> {
    block: Vec<&'a EventCallback>,
    transaction: Vec<&'a EventCallback>,
    log: Vec<&'a EventCallback>,
    trace: Vec<&'a EventCallback>,
    transfer: Vec<&'a EventCallback>,
}

fn partition(callbacks: &[EventCallback]) -> PartitionedCallbacks<'_> {
    let mut p = PartitionedCallbacks { block: vec![], transaction: vec![], log: vec![], trace: vec![], transfer: vec![] };
    for cb in callbacks {
        match cb {
            EventCallback::Block { .. } => p.block.push(cb),
            EventCallback::Transaction { .. } => p.transaction.push(cb),
            EventCallback::Log { .. } => p.log.push(cb),
            EventCallback::Trace { .. } => p.trace.push(cb),
            EventCallback::Transfer { .. } => p.transfer.push(cb),
        }
    }
    p
}

fn block_event(
    chain_id: u64,
    block: &EventBlock,
) -> CheckpointParts {
    CheckpointParts {
        block_timestamp: block.timestamp,
        chain_id,
        block_number: block.number,
        transaction_index: 0,
        event_type: EventType::Block,
        event_index: 0,
    }
}

/// Build the checkpoint-sorted `RawEvent` stream for one chain's batch.
///
/// Fails hard with [`IndexerError::MissingReceipt`] if any matched filter
/// demands a receipt that the batch doesn't carry.
pub fn build_events(
    chain_id: u64,
    batch: &ChainBatch,
    callbacks: &[EventCallback],
    factories: &FactoryIndex,
) -> Result<Vec<RawEvent>, IndexerError> {
    let partitioned = partition(callbacks);

    // Children discovered within this batch are matchable alongside the
    // ones the caller already knows about.
    let factories = {
        let mut merged = factories.clone();
        for (factory_id, addresses) in &batch.child_addresses {
            for (address, discovered_at) in addresses {
                merged.insert(evindex_core::filter::FactoryId(factory_id.clone()), address.clone(), *discovered_at);
            }
        }
        merged
    };
    let factories = &factories;

    let blocks_by_number: HashMap<u64, &crate::raw::RawBlock> =
        batch.blocks.iter().map(|b| (b.number, b)).collect();
    let receipts_by_tx: HashMap<&str, &crate::raw::RawReceipt> =
        batch.receipts.iter().map(|r| (r.transaction_hash.as_str(), r)).collect();

    let mut events = Vec::new();

    // 1. Blocks: probe block-filter callbacks.
    for block in &batch.blocks {
        let event_block = to_event_block(block);
        for cb in &partitioned.block {
            let EventCallback::Block { filter, index } = cb else { unreachable!() };
            if filter.matches(block.number) {
                events.push(RawEvent {
                    chain_id,
                    event_callback_index: *index,
                    checkpoint: Checkpoint::encode(block_event(chain_id, &event_block)),
                    kind: EventType::Block,
                    block: event_block.clone(),
                    transaction: None,
                    transaction_receipt: None,
                    log: None,
                    trace: None,
                });
            }
        }
    }

    // 2. Transactions, in (blockNumber, txIndex) order.
    let mut transactions = batch.transactions.clone();
    transactions.sort_by_key(|t| (t.block_number, t.transaction_index));
    for tx in &transactions {
        let Some(block) = blocks_by_number.get(&tx.block_number) else { continue };
        let event_block = to_event_block(block);
        let receipt = receipts_by_tx.get(tx.hash.as_str()).map(|r| to_event_receipt(r));
        for cb in &partitioned.transaction {
            let EventCallback::Transaction { filter, index } = cb else { unreachable!() };
            let needs_receipt = !filter.include_reverted;
            if needs_receipt && receipt.is_none() {
                return Err(IndexerError::MissingReceipt { tx_hash: tx.hash.to_string() });
            }
            if filter.matches(tx.from.as_str(), tx.to.as_ref().map(|h| h.as_str()), receipt.as_ref(), tx.block_number, factories) {
                events.push(RawEvent {
                    chain_id,
                    event_callback_index: *index,
                    checkpoint: Checkpoint::encode(CheckpointParts {
                        block_timestamp: event_block.timestamp,
                        chain_id,
                        block_number: tx.block_number,
                        transaction_index: tx.transaction_index,
                        event_type: EventType::Transaction,
                        event_index: 0,
                    }),
                    kind: EventType::Transaction,
                    block: event_block.clone(),
                    transaction: Some(to_event_transaction(tx)),
                    transaction_receipt: receipt.clone(),
                    log: None,
                    trace: None,
                });
            }
        }
    }

    let transactions_by_hash: HashMap<&str, &crate::raw::RawTransaction> =
        batch.transactions.iter().map(|t| (t.hash.as_str(), t)).collect();

    // 3. Traces: probe trace-filter and transfer-filter callbacks.
    for trace in &batch.traces {
        let Some(block) = blocks_by_number.get(&trace.block_number) else { continue };
        let event_block = to_event_block(block);
        let owning_tx = transactions_by_hash.get(trace.transaction_hash.as_str());
        let receipt = receipts_by_tx.get(trace.transaction_hash.as_str()).map(|r| to_event_receipt(r));
        let event_trace = to_event_trace(trace);

        for cb in &partitioned.trace {
            let EventCallback::Trace { filter, index } = cb else { unreachable!() };
            if filter.matches(&event_trace, trace.block_number, factories) {
                push_trace_event(&mut events, chain_id, *index, EventType::Trace, &event_block, owning_tx, receipt.clone(), &event_trace, trace);
            }
        }
        for cb in &partitioned.transfer {
            let EventCallback::Transfer { filter, index } = cb else { unreachable!() };
            if filter.matches(&event_trace, trace.block_number, factories) {
                push_trace_event(&mut events, chain_id, *index, EventType::Transfer, &event_block, owning_tx, receipt.clone(), &event_trace, trace);
            }
        }
    }

    // 4. Logs: probe log-filter callbacks.
    for log in &batch.logs {
        let Some(block) = blocks_by_number.get(&log.block_number) else { continue };
        let event_block = to_event_block(block);
        let owning_tx = transactions_by_hash.get(log.transaction_hash.as_str());
        let event_log = EventLog {
            address: log.address.clone(),
            topics: log.topics.clone(),
            data: log.data.clone(),
            log_index: log.log_index,
            removed: log.removed,
        };
        for cb in &partitioned.log {
            let EventCallback::Log { filter, index } = cb else { unreachable!() };
            if filter.matches(&event_log, log.block_number, factories) {
                events.push(RawEvent {
                    chain_id,
                    event_callback_index: *index,
                    checkpoint: Checkpoint::encode(CheckpointParts {
                        block_timestamp: event_block.timestamp,
                        chain_id,
                        block_number: log.block_number,
                        transaction_index: log.transaction_index,
                        event_type: EventType::Log,
                        event_index: log.log_index,
                    }),
                    kind: EventType::Log,
                    block: event_block.clone(),
                    transaction: owning_tx.map(|t| to_event_transaction(t)),
                    transaction_receipt: receipts_by_tx.get(log.transaction_hash.as_str()).map(|r| to_event_receipt(r)),
                    log: Some(event_log.clone()),
                    trace: None,
                });
            }
        }
    }

    events.sort_by(|a, b| a.checkpoint.as_str().cmp(b.checkpoint.as_str()));

    Ok(events)
}

#[allow(clippy::too_many_arguments)]
fn push_trace_event(
    events: &mut Vec<RawEvent>,
    chain_id: u64,
    index: usize,
    kind: EventType,
    event_block: &EventBlock,
    owning_tx: Option<&&crate::raw::RawTransaction>,
    receipt: Option<EventReceipt>,
    event_trace: &EventTrace,
    raw_trace: &RawTrace,
) {
    events.push(RawEvent {
        chain_id,
        event_callback_index: index,
        checkpoint: Checkpoint::encode(CheckpointParts {
            block_timestamp: event_block.timestamp,
            chain_id,
            block_number: raw_trace.block_number,
            transaction_index: raw_trace.transaction_index,
            event_type: kind,
            event_index: raw_trace.trace_index,
        }),
        kind,
        block: event_block.clone(),
        transaction: owning_tx.map(|t| to_event_transaction(t)),
        transaction_receipt: receipt,
        log: None,
        trace: Some(event_trace.clone()),
    });
}

fn to_event_block(block: &crate::raw::RawBlock) -> EventBlock {
    EventBlock { number: block.number, hash: block.hash.clone(), timestamp: block.timestamp }
}

fn to_event_transaction(tx: &crate::raw::RawTransaction) -> EventTransaction {
    EventTransaction {
        hash: tx.hash.clone(),
        transaction_index: tx.transaction_index,
        from: tx.from.clone(),
        to: tx.to.clone(),
        input: tx.input.clone(),
        value: tx.value.clone(),
    }
}

fn to_event_receipt(r: &crate::raw::RawReceipt) -> EventReceipt {
    EventReceipt { status: r.status, gas_used: r.gas_used }
}

fn to_event_trace(t: &crate::raw::RawTrace) -> EventTrace {
    EventTrace {
        trace_index: t.trace_index,
        from: t.from.clone(),
        to: t.to.clone(),
        call_type: t.call_type.clone(),
        input: t.input.clone(),
        output: t.output.clone(),
        value: t.value.clone(),
        error: t.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evindex_core::filter::{AddressSet, BlockWindow};
    use evindex_core::Hex;
    use crate::raw::{RawBlock, RawLog, RawReceipt, RawTransaction};

    fn block(number: u64, timestamp: u64) -> RawBlock {
        RawBlock {
            number,
            hash: Hex::new(format!("0xblock{number}")),
            parent_hash: Hex::new(format!("0xblock{}", number.saturating_sub(1))),
            timestamp,
            logs_bloom: vec![0; 256],
        }
    }

    #[test]
    fn emitted_events_are_sorted_and_block_number_matches_checkpoint() {
        let batch = ChainBatch {
            blocks: vec![block(1, 1000), block(2, 1012)],
            logs: vec![
                RawLog {
                    address: Hex::new("0xtoken"),
                    topics: vec![Hex::new("0xtransfer")],
                    data: "0x".into(),
                    block_number: 2,
                    transaction_hash: Hex::new("0xtx2"),
                    transaction_index: 0,
                    log_index: 0,
                    removed: false,
                },
                RawLog {
                    address: Hex::new("0xtoken"),
                    topics: vec![Hex::new("0xtransfer")],
                    data: "0x".into(),
                    block_number: 1,
                    transaction_hash: Hex::new("0xtx1"),
                    transaction_index: 0,
                    log_index: 0,
                    removed: false,
                },
            ],
            ..Default::default()
        };
        let callbacks = vec![EventCallback::Log {
            filter: LogFilter {
                chain_id: 1,
                addresses: AddressSet::Fixed(vec!["0xtoken".into()]),
                topics: [Some(vec!["0xtransfer".into()]), None, None, None],
                window: BlockWindow::default(),
            },
            index: 0,
        }];
        let factories = FactoryIndex::new();
        let events = build_events(1, &batch, &callbacks, &factories).unwrap();

        assert_eq!(events.len(), 2);
        assert!(events[0].checkpoint.as_str() < events[1].checkpoint.as_str());
        assert_eq!(events[0].block.number, 1);
        assert_eq!(events[1].block.number, 2);
        for e in &events {
            assert_eq!(e.checkpoint_block_number().unwrap(), e.block.number);
        }
    }

    #[test]
    fn transaction_filter_without_receipt_fails_hard() {
        let batch = ChainBatch {
            blocks: vec![block(1, 1000)],
            transactions: vec![RawTransaction {
                hash: Hex::new("0xtx1"),
                block_number: 1,
                transaction_index: 0,
                from: Hex::new("0xfrom"),
                to: Some(Hex::new("0xto")),
                input: "0x".into(),
                value: "0x0".into(),
            }],
            receipts: vec![],
            ..Default::default()
        };
        let callbacks = vec![EventCallback::Transaction {
            filter: TransactionFilter { from_addresses: None, to_addresses: None, include_reverted: false, window: BlockWindow::default() },
            index: 0,
        }];
        let factories = FactoryIndex::new();
        let err = build_events(1, &batch, &callbacks, &factories).unwrap_err();
        assert!(matches!(err, IndexerError::MissingReceipt { .. }));
    }

    #[test]
    fn transaction_filter_with_receipt_present_succeeds() {
        let batch = ChainBatch {
            blocks: vec![block(1, 1000)],
            transactions: vec![RawTransaction {
                hash: Hex::new("0xtx1"),
                block_number: 1,
                transaction_index: 0,
                from: Hex::new("0xfrom"),
                to: Some(Hex::new("0xto")),
                input: "0x".into(),
                value: "0x0".into(),
            }],
            receipts: vec![RawReceipt { transaction_hash: Hex::new("0xtx1"), status: true, gas_used: 21000 }],
            ..Default::default()
        };
        let callbacks = vec![EventCallback::Transaction {
            filter: TransactionFilter { from_addresses: None, to_addresses: None, include_reverted: false, window: BlockWindow::default() },
            index: 0,
        }];
        let factories = FactoryIndex::new();
        let events = build_events(1, &batch, &callbacks, &factories).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::Transaction);
    }

    #[test]
    fn batch_child_addresses_resolve_factory_filters() {
        let batch = ChainBatch {
            blocks: vec![block(5, 1000)],
            logs: vec![RawLog {
                address: Hex::new("0xchild"),
                topics: vec![],
                data: "0x".into(),
                block_number: 5,
                transaction_hash: Hex::new("0xtx"),
                transaction_index: 0,
                log_index: 0,
                removed: false,
            }],
            child_addresses: std::collections::HashMap::from([(
                "pool-factory".to_string(),
                vec![("0xchild".to_string(), 3u64)],
            )]),
            ..Default::default()
        };
        let callbacks = vec![EventCallback::Log {
            filter: LogFilter {
                chain_id: 1,
                addresses: AddressSet::Factory(evindex_core::filter::FactoryId("pool-factory".into())),
                topics: [None, None, None, None],
                window: BlockWindow::default(),
            },
            index: 0,
        }];
        let events = build_events(1, &batch, &callbacks, &FactoryIndex::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].log.as_ref().unwrap().address.as_str(), "0xchild");
    }

    #[test]
    fn block_filter_emits_one_event_per_matching_block() {
        let batch = ChainBatch { blocks: vec![block(10, 1000), block(20, 1100), block(21, 1101)], ..Default::default() };
        let callbacks = vec![EventCallback::Block {
            filter: BlockFilter { offset: 0, interval: 10, window: BlockWindow::default() },
            index: 0,
        }];
        let factories = FactoryIndex::new();
        let events = build_events(1, &batch, &callbacks, &factories).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].block.number, 10);
        assert_eq!(events[1].block.number, 20);
    }
}
