//! `LightBlock` and the in-memory local chain used for cheap reorg
//! detection: a sliding window generalized from a fixed-capacity ring
//! buffer into an explicitly finality-pruned chain segment.

use std::collections::VecDeque;

/// `{hash, parentHash, number, timestamp, logsBloom}` — the minimal block
/// header the sync engine needs to detect reorgs without holding full
/// block bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct LightBlock {
    pub hash: String,
    pub parent_hash: String,
    pub number: u64,
    pub timestamp: u64,
    pub logs_bloom: String,
}

impl LightBlock {
    /// Does `self` extend `parent` (i.e. is `parent` this block's direct
    /// predecessor on the canonical chain)?
    pub fn extends(&self, parent: &LightBlock) -> bool {
        self.parent_hash.eq_ignore_ascii_case(&parent.hash)
    }
}

/// Ordered sequence of [`LightBlock`]s above the finalized block, oldest
/// first. Invariants: strictly increasing `number`; adjacent blocks
/// satisfy `blocks[i+1].parent_hash == blocks[i].hash`;
/// `blocks[0].number == finalized_block.number + 1` once a finalized block
/// exists (enforced by the caller that knows the finalized pointer, not by
/// this type).
#[derive(Debug, Clone, Default)]
pub struct LocalChain {
    blocks: VecDeque<LightBlock>,
}

impl LocalChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip(&self) -> Option<&LightBlock> {
        self.blocks.back()
    }

    pub fn oldest(&self) -> Option<&LightBlock> {
        self.blocks.front()
    }

    pub fn get(&self, number: u64) -> Option<&LightBlock> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LightBlock> {
        self.blocks.iter()
    }

    /// Append a block that's already been verified to extend the current
    /// tip (the "linked" transition).
    pub fn push(&mut self, block: LightBlock) {
        self.blocks.push_back(block);
    }

    /// Drop every block with `number >= from` (the first step of reorg
    /// handling: discard everything the new head invalidates).
    pub fn drop_from(&mut self, from: u64) {
        while matches!(self.blocks.back(), Some(b) if b.number >= from) {
            self.blocks.pop_back();
        }
    }

    /// Remove and return the current tip (used while walking backward
    /// during reorg recovery).
    pub fn pop_tip(&mut self) -> Option<LightBlock> {
        self.blocks.pop_back()
    }

    /// Discard every block with `number <= up_to` — finalization pruning
    /// once `pendingFinalized` has been committed to a cache interval.
    pub fn prune_up_to(&mut self, up_to: u64) {
        while matches!(self.blocks.front(), Some(b) if b.number <= up_to) {
            self.blocks.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> LightBlock {
        LightBlock { number, hash: hash.into(), parent_hash: parent.into(), timestamp: number * 12, logs_bloom: "0x0".into() }
    }

    #[test]
    fn extends_checks_parent_hash_case_insensitively() {
        let parent = block(100, "0xAAA", "0x0");
        let child = block(101, "0xbbb", "0xaaa");
        assert!(child.extends(&parent));
    }

    #[test]
    fn drop_from_removes_tail_inclusive() {
        let mut chain = LocalChain::new();
        for i in 100..=105 {
            chain.push(block(i, &format!("0x{i}"), &format!("0x{}", i.saturating_sub(1))));
        }
        chain.drop_from(103);
        assert_eq!(chain.tip().unwrap().number, 102);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn prune_up_to_keeps_only_blocks_strictly_above() {
        let mut chain = LocalChain::new();
        for i in 100..=105 {
            chain.push(block(i, &format!("0x{i}"), &format!("0x{}", i.saturating_sub(1))));
        }
        chain.prune_up_to(102);
        assert_eq!(chain.oldest().unwrap().number, 103);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn pop_tip_walks_backward_one_block_at_a_time() {
        let mut chain = LocalChain::new();
        chain.push(block(100, "0xa", "0x0"));
        chain.push(block(101, "0xb", "0xa"));
        let popped = chain.pop_tip().unwrap();
        assert_eq!(popped.number, 101);
        assert_eq!(chain.tip().unwrap().number, 100);
    }
}
