// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the definition of the MaliciousBlockTree.
/// Colluding peers use it in place of the plain BlockTree: the tie break on
/// equal-depth forks favours the ringmaster, and the ringmaster additionally
/// keeps a private chain of self-mined blocks that have not been announced to
/// the public network yet.
use crate::block::{Block, BlockId, PeerId};
use crate::blocktree::BlockTree;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MaliciousBlockTree {
    /// The public view of the chain, with ringmaster-favouring tie break.
    pub tree: BlockTree,
    /// Id of the ringmaster peer.
    pub ringmaster: PeerId,
    /// Ringmaster-mined blocks withheld from the public network, with the
    /// time each was mined, kept sorted by depth. Empty for plain colluders.
    pub private_chain: Vec<(Block, f64)>,
    /// Private-chain broadcast notices already processed, so the overlay
    /// flood terminates.
    pub seen_broadcasts: HashSet<BlockId>,
}

impl MaliciousBlockTree {
    pub fn new(genesis: Block, ringmaster: PeerId) -> MaliciousBlockTree {
        MaliciousBlockTree {
            tree: BlockTree::with_tie_break(genesis, ringmaster),
            ringmaster,
            private_chain: Vec::new(),
            seen_broadcasts: HashSet::new(),
        }
    }

    /// A block counts as seen whether it sits in the public tree or in the
    /// private chain.
    pub fn seen(&self, blk_id: &str) -> bool {
        self.tree.seen(blk_id) || self.private_chain.iter().any(|(b, _)| b.blk_id == blk_id)
    }

    /// Look a block up in the private chain first, then in the public tree.
    pub fn get_block(&self, blk_id: &str) -> Option<&Block> {
        self.private_chain
            .iter()
            .map(|(block, _)| block)
            .find(|block| block.blk_id == blk_id)
            .or_else(|| self.tree.get_block(blk_id))
    }

    /// Append a self-mined block to the private chain.
    pub fn add_selfish_block(&mut self, block: Block, arr_time: f64) {
        self.private_chain.push((block, arr_time));
        self.private_chain.sort_by_key(|(block, _)| block.depth);
    }

    pub fn check_broadcast(&self, blk_id: &str) -> bool {
        self.seen_broadcasts.contains(blk_id)
    }

    pub fn last_private_block(&self) -> Option<&Block> {
        self.private_chain.last().map(|(block, _)| block)
    }

    /// Remove and return the prefix of the private chain up through `blk_id`
    /// (the whole chain if the id is not found), marking the broadcast as
    /// seen. The caller re-adds the returned blocks through the public path.
    pub fn take_private_chain(&mut self, blk_id: &BlockId) -> Vec<(Block, f64)> {
        self.seen_broadcasts.insert(blk_id.clone());

        let cut = self
            .private_chain
            .iter()
            .position(|(block, _)| block.blk_id == *blk_id)
            .map(|idx| idx + 1)
            .unwrap_or(self.private_chain.len());
        self.private_chain.drain(..cut).collect()
    }

    /// Release decision after a block mined by someone else entered the
    /// public tree: surrender the whole private chain once the lead over the
    /// public tip has shrunk to one block or less. Self-mined blocks never
    /// release anything; the ringmaster only reacts to the honest chain.
    pub fn release_after_external(&self) -> Option<BlockId> {
        let (last, _) = self.private_chain.last()?;
        if last.depth <= self.tree.tip_block().depth + 1 {
            Some(last.blk_id.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Transaction;

    const RM: PeerId = 0;

    fn coinbase_block(id_seed: u64, creator: PeerId, parent: &Block, at: f64) -> Block {
        Block::new(creator, vec![Transaction::coinbase(id_seed, creator)], parent, at)
    }

    #[test]
    fn private_blocks_count_as_seen_but_stay_unpublished() {
        let genesis = Block::genesis(2);
        let p1 = coinbase_block(1, RM, &genesis, 1.0);

        let mut tree = MaliciousBlockTree::new(genesis, RM);
        tree.add_selfish_block(p1.clone(), 1.0);

        assert!(tree.seen(&p1.blk_id));
        assert!(!tree.tree.seen(&p1.blk_id));
        assert_eq!(tree.get_block(&p1.blk_id).unwrap().blk_id, p1.blk_id);
    }

    #[test]
    fn private_chain_stays_sorted_by_depth() {
        let genesis = Block::genesis(2);
        let p1 = coinbase_block(1, RM, &genesis, 1.0);
        let p2 = coinbase_block(2, RM, &p1, 2.0);

        let mut tree = MaliciousBlockTree::new(genesis, RM);
        tree.add_selfish_block(p2.clone(), 2.0);
        tree.add_selfish_block(p1.clone(), 1.0);
        assert_eq!(tree.private_chain[0].0.blk_id, p1.blk_id);
        assert_eq!(tree.private_chain[1].0.blk_id, p2.blk_id);
    }

    #[test]
    fn take_private_chain_returns_prefix() {
        let genesis = Block::genesis(2);
        let p1 = coinbase_block(1, RM, &genesis, 1.0);
        let p2 = coinbase_block(2, RM, &p1, 2.0);
        let p3 = coinbase_block(3, RM, &p2, 3.0);

        let mut tree = MaliciousBlockTree::new(genesis, RM);
        for block in [&p1, &p2, &p3] {
            tree.add_selfish_block((*block).clone(), block.timestamp);
        }

        let released = tree.take_private_chain(&p2.blk_id);
        assert_eq!(released.len(), 2);
        assert_eq!(released[1].0.blk_id, p2.blk_id);
        assert_eq!(tree.private_chain.len(), 1);
        assert!(tree.check_broadcast(&p2.blk_id));
    }

    #[test]
    fn external_block_triggers_release_at_small_lead() {
        let genesis = Block::genesis(2);
        let p1 = coinbase_block(1, RM, &genesis, 1.0);
        let p2 = coinbase_block(2, RM, &p1, 2.0);
        let honest = coinbase_block(3, 1, &genesis, 1.5);

        let mut tree = MaliciousBlockTree::new(genesis, RM);
        tree.add_selfish_block(p1.clone(), 1.0);
        tree.add_selfish_block(p2.clone(), 2.0);
        // Lead of two over genesis: hold.
        assert_eq!(tree.release_after_external(), None);

        // An honest block at depth 1 shrinks the lead to one: release all.
        tree.tree.add_block(honest, 1.5);
        assert_eq!(tree.release_after_external(), Some(p2.blk_id.clone()));
    }

    #[test]
    fn no_release_while_the_lead_stays_large() {
        let genesis = Block::genesis(2);
        let p1 = coinbase_block(1, RM, &genesis, 1.0);
        let p2 = coinbase_block(2, RM, &p1, 2.0);
        let p3 = coinbase_block(3, RM, &p2, 3.0);
        let honest = coinbase_block(4, 1, &genesis, 1.5);

        let mut tree = MaliciousBlockTree::new(genesis, RM);
        for block in [&p1, &p2, &p3] {
            tree.add_selfish_block((*block).clone(), block.timestamp);
        }
        // Three ahead of depth 1: keep withholding.
        tree.tree.add_block(honest, 1.5);
        assert_eq!(tree.release_after_external(), None);
    }

    #[test]
    fn released_blocks_verify_on_the_public_path() {
        let genesis = Block::genesis(2);
        let p1 = coinbase_block(1, RM, &genesis, 1.0);
        let p2 = coinbase_block(2, RM, &p1, 2.0);

        let mut tree = MaliciousBlockTree::new(genesis, RM);
        tree.add_selfish_block(p1.clone(), 1.0);
        tree.add_selfish_block(p2.clone(), 2.0);

        let release_id = p2.blk_id.clone();
        for (block, at) in tree.take_private_chain(&release_id) {
            tree.tree.add_block(block, at);
        }
        assert!(tree.tree.verified.contains(&p1.blk_id));
        assert!(tree.tree.verified.contains(&p2.blk_id));
        assert_eq!(tree.tree.longest_tip, p2.blk_id);
        assert!(tree.private_chain.is_empty());
    }
}
