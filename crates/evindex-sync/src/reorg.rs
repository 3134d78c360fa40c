//! Reorg recovery: when a newly observed head doesn't extend the local
//! chain's tip, walk backward dropping blocks until a common ancestor is
//! found. Classifies by depth, walks the window backward for a matching
//! parent hash, and falls back to re-fetching ancestors over RPC once the
//! local chain's fixed-capacity window doesn't go back far enough.

use evindex_core::error::IndexerError;

use crate::light_block::{LightBlock, LocalChain};
use crate::rpc::RpcClient;

/// Outcome of a successful reorg recovery: the depth of the rollback (how
/// many blocks were dropped) and the common ancestor both chains now agree
/// on.
#[derive(Debug, Clone)]
pub struct ReorgOutcome {
    pub depth: u64,
    pub common_ancestor: LightBlock,
}

/// Recover from a reorg observed via `new_head` not extending `chain`'s tip.
///
/// Step 1: drop every block in `chain` with `number >= new_head.number`
/// (those blocks are now definitely invalid). Step 2: walk backward — fetch
/// the parent of the current local tip from `rpc`, compare to the chain's
/// next-older block; if they match, the common ancestor is found. Step 3:
/// if they don't match, drop that block too and repeat. Step 4: if the
/// chain empties before a match is found, the reorg is unrecoverable.
pub async fn recover(chain: &mut LocalChain, new_head: &LightBlock, rpc: &dyn RpcClient, chain_id: u64) -> Result<ReorgOutcome, IndexerError> {
    chain.drop_from(new_head.number);

    let mut depth = 0u64;
    loop {
        let Some(tip) = chain.tip().cloned() else {
            return Err(IndexerError::UnrecoverableReorg { depth });
        };

        let canonical = rpc
            .get_block_by_number(chain_id, tip.number)
            .await?
            .ok_or_else(|| IndexerError::Rpc(format!("block {} vanished mid-reorg", tip.number)))?;

        if canonical.hash.eq_ignore_ascii_case(&tip.hash) {
            return Ok(ReorgOutcome { depth, common_ancestor: tip });
        }

        chain.pop_tip();
        depth += 1;
    }
}
