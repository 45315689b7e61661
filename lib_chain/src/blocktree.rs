// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the definition of the BlockTree.
/// The BlockTree is the per-peer view of all blocks the peer has received.
/// The longest path from the genesis block is the main chain, ending at
/// `longest_tip`. Blocks whose parent has not been verified yet are parked in
/// the dangling map and promoted once the parent arrives.
use crate::block::{Block, BlockId, PeerId, Transaction, TxnId, MINING_REWARD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// The per-peer tree of blocks.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockTree {
    /// Every block this peer has received, valid or not, keyed by id.
    pub seen_blocks: HashMap<BlockId, Block>,
    /// Parent id to the ids of its verified children.
    pub children: HashMap<BlockId, Vec<BlockId>>,
    /// Ids of blocks whose whole ancestry has been verified.
    pub verified: HashSet<BlockId>,
    /// Simulation time at which each block was first seen.
    pub arrival: HashMap<BlockId, f64>,
    /// Id of the genesis block (the root).
    pub genesis_id: BlockId,
    /// Id of the tip of the longest verified chain.
    pub longest_tip: BlockId,
    /// Tip before the most recent top-level insertion, for mempool
    /// reconciliation after a fork switch. Not updated while promoting
    /// dangling descendants.
    pub prev_tip: Option<BlockId>,
    /// Missing parent id to the ids of received children waiting for it.
    pub dangling: HashMap<BlockId, Vec<BlockId>>,
    /// On an equal-depth fork, a block by this creator displaces the incumbent
    /// tip. Honest peers leave this unset and keep the incumbent.
    pub tie_break_creator: Option<PeerId>,
}

impl BlockTree {
    /// Create a tree rooted at the genesis block.
    pub fn new(genesis: Block) -> BlockTree {
        let genesis_id = genesis.blk_id.clone();
        BlockTree {
            seen_blocks: HashMap::from([(genesis_id.clone(), genesis)]),
            children: HashMap::new(),
            verified: HashSet::from([genesis_id.clone()]),
            arrival: HashMap::from([(genesis_id.clone(), 0.0)]),
            genesis_id: genesis_id.clone(),
            longest_tip: genesis_id,
            prev_tip: None,
            dangling: HashMap::new(),
            tie_break_creator: None,
        }
    }

    /// Create a tree whose equal-depth tie break favours `creator`.
    pub fn with_tie_break(genesis: Block, creator: PeerId) -> BlockTree {
        let mut tree = BlockTree::new(genesis);
        tree.tie_break_creator = Some(creator);
        tree
    }

    /// Whether the block has been received before (verified, dangling or
    /// discarded). Used for loopless forwarding.
    pub fn seen(&self, blk_id: &str) -> bool {
        self.seen_blocks.contains_key(blk_id)
    }

    pub fn get_block(&self, blk_id: &str) -> Option<&Block> {
        self.seen_blocks.get(blk_id)
    }

    /// The block at the end of the longest chain.
    pub fn tip_block(&self) -> &Block {
        &self.seen_blocks[&self.longest_tip]
    }

    /// Add a newly received block to the tree.
    /// The block is recorded as seen either way. If the parent has not been
    /// verified the block dangles until the parent arrives; if verification
    /// fails, the block and all dangling descendants are discarded.
    pub fn add_block(&mut self, block: Block, arr_time: f64) {
        if self.seen(&block.blk_id) {
            return;
        }

        self.arrival.insert(block.blk_id.clone(), arr_time);
        self.seen_blocks.insert(block.blk_id.clone(), block.clone());

        if !self.verified.contains(&block.parent) {
            self.dangling
                .entry(block.parent.clone())
                .or_default()
                .push(block.blk_id.clone());
            return;
        }

        if !self.verify_correctness(&block) {
            self.discard_dangling(&block.blk_id);
            return;
        }

        self.verified.insert(block.blk_id.clone());
        self.children
            .entry(block.parent.clone())
            .or_default()
            .push(block.blk_id.clone());

        self.prev_tip = Some(self.longest_tip.clone());
        self.update_longest_chain(&block);

        self.promote_dangling(&block.blk_id);
    }

    /// Verify and attach a block whose parent was just verified, recursively.
    /// The same as `add_block` except `prev_tip` is left untouched.
    fn add_promoted(&mut self, block: Block) {
        if !self.verify_correctness(&block) {
            self.discard_dangling(&block.blk_id);
            return;
        }

        self.verified.insert(block.blk_id.clone());
        self.children
            .entry(block.parent.clone())
            .or_default()
            .push(block.blk_id.clone());

        self.update_longest_chain(&block);

        self.promote_dangling(&block.blk_id);
    }

    fn promote_dangling(&mut self, parent_id: &BlockId) {
        if let Some(child_ids) = self.dangling.remove(parent_id) {
            for child_id in child_ids {
                let child = self.seen_blocks[&child_id].clone();
                self.add_promoted(child);
            }
        }
    }

    /// Drop the dangling subtree rooted below an invalid block. The blocks
    /// stay in `seen_blocks` so re-delivery remains a no-op; they are never
    /// verified.
    fn discard_dangling(&mut self, blk_id: &BlockId) {
        if let Some(child_ids) = self.dangling.remove(blk_id) {
            for child_id in child_ids {
                self.discard_dangling(&child_id);
            }
        }
    }

    /// Check a candidate block against its parent's balance snapshot:
    /// the first transaction must be the coinbase with the mining reward, and
    /// no sender may spend more in this block than the parent snapshot holds.
    pub fn verify_correctness(&self, block: &Block) -> bool {
        let parent = &self.seen_blocks[&block.parent];

        match block.txns.first() {
            Some(txn) if txn.is_coinbase() && txn.amount == MINING_REWARD => {}
            _ => return false,
        }

        let mut spent: HashMap<PeerId, i64> = HashMap::new();
        for txn in block.txns.iter().skip(1) {
            match txn.sender {
                Some(sender) => *spent.entry(sender).or_insert(0) += txn.amount as i64,
                None => return false,
            }
        }

        spent
            .iter()
            .all(|(sender, amount)| *amount <= parent.balances[*sender])
    }

    fn update_longest_chain(&mut self, block: &Block) {
        let tip_depth = self.seen_blocks[&self.longest_tip].depth;
        if block.depth > tip_depth {
            self.longest_tip = block.blk_id.clone();
        } else if block.depth == tip_depth
            && self.tie_break_creator.is_some()
            && block.creator == self.tie_break_creator
        {
            self.longest_tip = block.blk_id.clone();
        }
    }

    /// Lowest common ancestor of two verified blocks. Walk the deeper pointer
    /// up to equal depth, then both up in lockstep. Genesis is the universal
    /// ancestor.
    pub fn lca(&self, blk1: &BlockId, blk2: &BlockId) -> BlockId {
        let mut a = &self.seen_blocks[blk1];
        let mut b = &self.seen_blocks[blk2];

        while a.depth < b.depth {
            b = &self.seen_blocks[&b.parent];
        }
        while a.depth > b.depth {
            a = &self.seen_blocks[&a.parent];
        }
        while a.blk_id != b.blk_id {
            a = &self.seen_blocks[&a.parent];
            b = &self.seen_blocks[&b.parent];
        }
        a.blk_id.clone()
    }

    /// Non-coinbase transactions on the chain from `blk_id` (inclusive) up to
    /// `ancestor_id` (exclusive), keyed by transaction id.
    pub fn txn_set(&self, blk_id: &BlockId, ancestor_id: &BlockId) -> BTreeMap<TxnId, Transaction> {
        let mut txns = BTreeMap::new();
        let mut curr = blk_id.clone();
        while curr != crate::block::GENESIS_PARENT && curr != *ancestor_id {
            let block = &self.seen_blocks[&curr];
            for txn in block.txns.iter().skip(1) {
                txns.insert(txn.txn_id, txn.clone());
            }
            curr = block.parent.clone();
        }
        txns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coinbase_block(id_seed: TxnId, creator: PeerId, parent: &Block, at: f64) -> Block {
        Block::new(creator, vec![Transaction::coinbase(id_seed, creator)], parent, at)
    }

    #[test]
    fn dangling_blocks_promote_in_any_order() {
        let genesis = Block::genesis(2);
        let b1 = coinbase_block(1, 0, &genesis, 1.0);
        let b2 = coinbase_block(2, 1, &b1, 2.0);
        let b3 = coinbase_block(3, 0, &b2, 3.0);

        let mut tree = BlockTree::new(genesis.clone());
        tree.add_block(b3.clone(), 10.0);
        tree.add_block(b2.clone(), 11.0);
        assert_eq!(tree.longest_tip, genesis.blk_id);
        assert_eq!(tree.verified.len(), 1);

        tree.add_block(b1.clone(), 12.0);
        assert_eq!(tree.verified.len(), 4);
        assert_eq!(tree.longest_tip, b3.blk_id);
        assert_eq!(tree.tip_block().depth, 3);

        // Deliver in a different order into a fresh tree: same verified set.
        let mut other = BlockTree::new(genesis);
        other.add_block(b2, 10.0);
        other.add_block(b1, 11.0);
        other.add_block(b3, 12.0);
        assert_eq!(other.verified, tree.verified);
        assert_eq!(other.longest_tip, tree.longest_tip);
    }

    #[test]
    fn readding_a_seen_block_is_a_noop() {
        let genesis = Block::genesis(2);
        let b1 = coinbase_block(1, 0, &genesis, 1.0);
        let mut tree = BlockTree::new(genesis);

        tree.add_block(b1.clone(), 5.0);
        tree.add_block(b1.clone(), 9.0);
        assert_eq!(tree.arrival[&b1.blk_id], 5.0);
        assert_eq!(tree.children[&b1.parent], vec![b1.blk_id.clone()]);
    }

    #[test]
    fn overspending_block_and_descendants_are_discarded() {
        let genesis = Block::genesis(2);
        let b1 = coinbase_block(1, 0, &genesis, 1.0);
        // Peer 0 holds 50 after b1 but tries to spend 51.
        let bad = Block::new(
            1,
            vec![Transaction::coinbase(2, 1), Transaction::new(3, 0, 1, 51)],
            &b1,
            2.0,
        );
        let child_of_bad = coinbase_block(4, 0, &bad, 3.0);

        let mut tree = BlockTree::new(genesis);
        tree.add_block(b1.clone(), 1.0);
        tree.add_block(child_of_bad.clone(), 2.0);
        tree.add_block(bad.clone(), 3.0);

        assert!(!tree.verified.contains(&bad.blk_id));
        assert!(!tree.verified.contains(&child_of_bad.blk_id));
        assert_eq!(tree.longest_tip, b1.blk_id);
        // Both stay seen so redelivery is suppressed.
        assert!(tree.seen(&bad.blk_id));
        assert!(tree.seen(&child_of_bad.blk_id));
    }

    #[test]
    fn missing_coinbase_is_rejected() {
        let genesis = Block::genesis(2);
        let no_txns = Block::new(0, vec![], &genesis, 1.0);
        let no_coinbase = Block::new(0, vec![Transaction::new(1, 0, 1, 1)], &genesis, 1.0);

        let mut tree = BlockTree::new(genesis);
        tree.add_block(no_txns.clone(), 1.0);
        tree.add_block(no_coinbase.clone(), 2.0);
        assert!(!tree.verified.contains(&no_txns.blk_id));
        assert!(!tree.verified.contains(&no_coinbase.blk_id));
    }

    #[test]
    fn equal_depth_fork_keeps_incumbent_tip() {
        let genesis = Block::genesis(2);
        let a = coinbase_block(1, 0, &genesis, 1.0);
        let b = coinbase_block(2, 1, &genesis, 1.5);

        let mut tree = BlockTree::new(genesis);
        tree.add_block(a.clone(), 1.0);
        tree.add_block(b.clone(), 2.0);
        assert_eq!(tree.longest_tip, a.blk_id);
    }

    #[test]
    fn tie_break_creator_displaces_incumbent() {
        let genesis = Block::genesis(2);
        let a = coinbase_block(1, 0, &genesis, 1.0);
        let b = coinbase_block(2, 1, &genesis, 1.5);

        let mut tree = BlockTree::with_tie_break(genesis, 1);
        tree.add_block(a.clone(), 1.0);
        tree.add_block(b.clone(), 2.0);
        assert_eq!(tree.longest_tip, b.blk_id);
    }

    #[test]
    fn lca_walks_forks_to_common_ancestor() {
        let genesis = Block::genesis(3);
        let b1 = coinbase_block(1, 0, &genesis, 1.0);
        let left = coinbase_block(2, 1, &b1, 2.0);
        let right = coinbase_block(3, 2, &b1, 2.5);
        let right2 = coinbase_block(4, 2, &right, 3.0);

        let mut tree = BlockTree::new(genesis.clone());
        for block in [&b1, &left, &right, &right2] {
            tree.add_block((*block).clone(), 1.0);
        }
        assert_eq!(tree.lca(&left.blk_id, &right2.blk_id), b1.blk_id);
        assert_eq!(tree.lca(&right2.blk_id, &right2.blk_id), right2.blk_id);
        assert_eq!(tree.lca(&b1.blk_id, &genesis.blk_id), genesis.blk_id);
    }

    #[test]
    fn txn_set_collects_branch_transactions() {
        let genesis = Block::genesis(3);
        let b1 = Block::new(
            0,
            vec![Transaction::coinbase(1, 0)],
            &genesis,
            1.0,
        );
        let b2 = Block::new(
            1,
            vec![Transaction::coinbase(2, 1), Transaction::new(3, 0, 2, 10)],
            &b1,
            2.0,
        );

        let mut tree = BlockTree::new(genesis.clone());
        tree.add_block(b1.clone(), 1.0);
        tree.add_block(b2.clone(), 2.0);

        let set = tree.txn_set(&b2.blk_id, &genesis.blk_id);
        assert_eq!(set.len(), 1);
        assert!(set.contains_key(&3));

        let empty = tree.txn_set(&b2.blk_id, &b2.blk_id);
        assert!(empty.is_empty());
    }

    #[test]
    fn prev_tip_pins_to_outermost_add() {
        let genesis = Block::genesis(2);
        let b1 = coinbase_block(1, 0, &genesis, 1.0);
        let b2 = coinbase_block(2, 1, &b1, 2.0);

        let mut tree = BlockTree::new(genesis.clone());
        // b2 dangles, then b1 promotes it. prev_tip must reflect the tip
        // before the outer add (genesis), not the intermediate promotion.
        tree.add_block(b2.clone(), 1.0);
        tree.add_block(b1.clone(), 2.0);
        assert_eq!(tree.prev_tip.as_deref(), Some(genesis.blk_id.as_str()));
        assert_eq!(tree.longest_tip, b2.blk_id);
    }
}
