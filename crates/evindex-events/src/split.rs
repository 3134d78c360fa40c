//! `split_events` — groups a checkpoint-sorted event stream into contiguous
//! runs sharing a block hash, each capped at that block's `MAX_CHECKPOINT`.

use evindex_core::checkpoint::Checkpoint;
use evindex_core::types::Event;

/// A run of events sharing one block, plus the derived boundary checkpoint
/// handlers should treat as "this block is fully processed."
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub boundary_checkpoint: Checkpoint,
    pub events: Vec<Event>,
}

/// Split a sorted stream into contiguous per-block groups. Assumes the
/// input is already checkpoint-ascending (as `build_events`/`decode_events`
/// guarantee); does not re-sort.
pub fn split_events(events: Vec<Event>) -> Vec<EventGroup> {
    let mut groups: Vec<EventGroup> = Vec::new();

    for event in events {
        let block_hash = event.raw.block.hash.to_string();
        let chain_id = event.raw.chain_id;
        let block_number = event.raw.block.number;

        let starts_new_group = match groups.last() {
            Some(g) => g.block_hash != block_hash || g.chain_id != chain_id,
            None => true,
        };

        if starts_new_group {
            groups.push(EventGroup {
                chain_id,
                block_number,
                block_hash: block_hash.clone(),
                boundary_checkpoint: Checkpoint::max_of_block(event.raw.block.timestamp, chain_id, block_number),
                events: Vec::new(),
            });
        }

        groups.last_mut().unwrap().events.push(event);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use evindex_core::checkpoint::{CheckpointParts, EventType};
    use evindex_core::types::{EventBlock, EventPayload};
    use evindex_core::Hex;

    fn event(chain_id: u64, block_number: u64, block_hash: &str, event_index: u64) -> Event {
        let raw = evindex_core::types::RawEvent {
            chain_id,
            event_callback_index: 0,
            checkpoint: Checkpoint::encode(CheckpointParts {
                block_timestamp: 1000 + block_number,
                chain_id,
                block_number,
                transaction_index: 0,
                event_type: EventType::Log,
                event_index,
            }),
            kind: EventType::Log,
            block: EventBlock { number: block_number, hash: Hex::new(block_hash), timestamp: 1000 + block_number },
            transaction: None,
            transaction_receipt: None,
            log: None,
            trace: None,
        };
        Event { raw, payload: EventPayload::Block }
    }

    #[test]
    fn groups_contiguous_runs_by_block_hash() {
        let events = vec![
            event(1, 1, "0xa", 0),
            event(1, 1, "0xa", 1),
            event(1, 2, "0xb", 0),
        ];
        let groups = split_events(events);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].events.len(), 2);
        assert_eq!(groups[1].events.len(), 1);
    }

    #[test]
    fn boundary_checkpoint_is_max_of_its_block() {
        let events = vec![event(1, 5, "0xa", 3)];
        let groups = split_events(events);
        let group = &groups[0];
        assert!(group.events[0].raw.checkpoint.as_str() <= group.boundary_checkpoint.as_str());
    }

    #[test]
    fn different_chains_never_merge_into_one_group() {
        let events = vec![event(1, 1, "0xsame", 0), event(2, 1, "0xsame", 0)];
        let groups = split_events(events);
        assert_eq!(groups.len(), 2);
    }
}
