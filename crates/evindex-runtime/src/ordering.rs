//! Cross-chain ordering regimes: `omnichain` merges every chain's stream
//! into one checkpoint-sorted sequence; `multichain` keeps per-chain
//! streams independent and only merges for progress reporting. Relies
//! directly on `evindex_core::checkpoint::Checkpoint`'s total order.

use std::collections::BinaryHeap;
use std::cmp::Reverse;

use evindex_core::types::Event;

use crate::config::OrderingRegime;

/// Merge per-chain event streams (each already sorted ascending by
/// checkpoint, the invariant `build_events`/`split_events` guarantee)
/// according to `regime`.
///
/// - `Omnichain`: a single global stream, globally checkpoint-ordered.
/// - `Multichain`: the per-chain streams are returned unmerged, in the
///   same order they were given; each stays internally ordered but no
///   cross-chain interleaving is imposed.
pub fn order_streams(regime: OrderingRegime, per_chain: Vec<Vec<Event>>) -> Vec<Vec<Event>> {
    match regime {
        OrderingRegime::Omnichain => vec![merge_globally(per_chain)],
        OrderingRegime::Multichain => per_chain,
    }
}

fn merge_globally(per_chain: Vec<Vec<Event>>) -> Vec<Event> {
    struct Cursor {
        checkpoint: String,
        stream_index: usize,
        item_index: usize,
    }
    impl PartialEq for Cursor {
        fn eq(&self, other: &Self) -> bool {
            self.checkpoint == other.checkpoint
        }
    }
    impl Eq for Cursor {}
    impl PartialOrd for Cursor {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for Cursor {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.checkpoint.cmp(&other.checkpoint)
        }
    }

    let mut heap: BinaryHeap<Reverse<Cursor>> = BinaryHeap::new();
    for (stream_index, stream) in per_chain.iter().enumerate() {
        if let Some(first) = stream.first() {
            heap.push(Reverse(Cursor { checkpoint: first.checkpoint().as_str().to_string(), stream_index, item_index: 0 }));
        }
    }

    let mut merged = Vec::new();
    while let Some(Reverse(cursor)) = heap.pop() {
        let stream = &per_chain[cursor.stream_index];
        merged.push(stream[cursor.item_index].clone());

        if let Some(next) = stream.get(cursor.item_index + 1) {
            heap.push(Reverse(Cursor { checkpoint: next.checkpoint().as_str().to_string(), stream_index: cursor.stream_index, item_index: cursor.item_index + 1 }));
        }
    }
    merged
}

/// Per-chain progress for the global progress bar: the minimum of each
/// chain's latest processed timestamp, since the slowest chain bounds how
/// far the whole run has progressed.
pub fn global_progress_seconds(per_chain_seconds: &[u64]) -> Option<u64> {
    per_chain_seconds.iter().copied().min()
}
