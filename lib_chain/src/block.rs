// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the definition of transactions and blocks.
/// A block carries its full post-block balance snapshot, so validating a child
/// only requires looking at the parent block and the child's own transactions.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type PeerId = usize;
pub type BlockId = String;
pub type TxnId = u64;

/// Reward credited to the block creator by the coinbase transaction.
pub const MINING_REWARD: u64 = 50;
/// Logical size of one transaction in kilobits.
pub const TXN_SIZE_KBITS: f64 = 8.0;
/// Logical size of a block hash in kilobits. Get requests are sized the same.
pub const HASH_SIZE_KBITS: f64 = 0.512;
/// Parent id carried by the genesis block.
pub const GENESIS_PARENT: &str = "-1";

/// A single transfer of coins between two peers.
/// Transaction ids are issued from a dense counter owned by the simulation, so
/// every peer can track duplicates with a watermark instead of a full set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    /// Unique transaction id.
    pub txn_id: TxnId,
    /// The paying peer. `None` marks a coinbase transaction.
    pub sender: Option<PeerId>,
    /// The peer credited with `amount`.
    pub receiver: PeerId,
    /// Amount of coins transferred. Always positive.
    pub amount: u64,
}

impl Transaction {
    pub fn new(txn_id: TxnId, sender: PeerId, receiver: PeerId, amount: u64) -> Transaction {
        Transaction {
            txn_id,
            sender: Some(sender),
            receiver,
            amount,
        }
    }

    /// Create the coinbase transaction crediting `creator` with the mining reward.
    pub fn coinbase(txn_id: TxnId, creator: PeerId) -> Transaction {
        Transaction {
            txn_id,
            sender: None,
            receiver: creator,
            amount: MINING_REWARD,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender.is_none()
    }

    /// Canonical string form of the transaction, used for hashing.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self).unwrap()
    }

    /// Sha256 hash of the canonical form in hex. Used as a merkle leaf.
    pub fn gen_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical());
        let result = hasher.finalize();
        format!("{:x}", result)
    }
}

/// Compute the merkle root of a transaction list.
/// An odd level carries its last hash up unchanged. An empty list has the
/// root "0" (only the genesis block is empty).
pub fn merkle_root(txns: &[Transaction]) -> String {
    if txns.is_empty() {
        return "0".to_string();
    }

    let mut level: Vec<String> = txns.iter().map(|txn| txn.gen_hash()).collect();
    while level.len() > 1 {
        let mut next: Vec<String> = Vec::new();
        if level.len() % 2 != 0 {
            next.push(level.last().unwrap().clone());
        }
        for pair in level.chunks_exact(2) {
            let mut hasher = Sha256::new();
            hasher.update(pair[0].as_bytes());
            hasher.update(pair[1].as_bytes());
            next.push(format!("{:x}", hasher.finalize()));
        }
        level = next;
    }
    level[0].clone()
}

/// A block in the tree. Immutable once created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    /// Hex digest identifying the block; derived from parent id, timestamp,
    /// merkle root and the transaction list.
    pub blk_id: BlockId,
    /// The mining peer. `None` for the genesis block.
    pub creator: Option<PeerId>,
    /// Transactions in the block. The first one is the coinbase.
    pub txns: Vec<Transaction>,
    /// Id of the parent block ("-1" for genesis).
    pub parent: BlockId,
    /// Distance from genesis. Genesis is 0.
    pub depth: u64,
    /// Simulation time at which the creator started mining this block.
    pub timestamp: f64,
    /// Post-block coin balance per peer id, assuming the block is valid.
    pub balances: Vec<i64>,
}

impl Block {
    /// Build a block on top of `parent`. The balance snapshot is the parent's
    /// snapshot with every transaction applied (coinbase credits the creator).
    pub fn new(creator: PeerId, txns: Vec<Transaction>, parent: &Block, timestamp: f64) -> Block {
        let mut balances = parent.balances.clone();
        for txn in &txns {
            if let Some(sender) = txn.sender {
                balances[sender] -= txn.amount as i64;
            }
            balances[txn.receiver] += txn.amount as i64;
        }

        Block {
            blk_id: Block::compute_id(&parent.blk_id, timestamp, &txns),
            creator: Some(creator),
            txns,
            parent: parent.blk_id.clone(),
            depth: parent.depth + 1,
            timestamp,
            balances,
        }
    }

    /// The deterministic genesis block: no transactions, zero balances for all
    /// `num_peers` peers, timestamp 0, parent "-1". Known to every peer.
    pub fn genesis(num_peers: usize) -> Block {
        Block {
            blk_id: Block::compute_id(GENESIS_PARENT, 0.0, &[]),
            creator: None,
            txns: Vec::new(),
            parent: GENESIS_PARENT.to_string(),
            depth: 0,
            timestamp: 0.0,
            balances: vec![0; num_peers],
        }
    }

    fn compute_id(parent: &str, timestamp: f64, txns: &[Transaction]) -> BlockId {
        let mut preimage = format!("{}|{}|{}|", parent, timestamp, merkle_root(txns));
        for txn in txns {
            preimage.push('|');
            preimage.push_str(&txn.canonical());
        }

        let mut hasher = Sha256::new();
        hasher.update(preimage.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Size of the block in kilobits: 8 kilobits per transaction, coinbase
    /// included.
    pub fn size_kbits(&self) -> f64 {
        self.txns.len() as f64 * TXN_SIZE_KBITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_carries_mining_reward() {
        let txn = Transaction::coinbase(7, 3);
        assert!(txn.is_coinbase());
        assert_eq!(txn.amount, MINING_REWARD);
        assert_eq!(txn.receiver, 3);
    }

    #[test]
    fn merkle_root_is_stable() {
        let txns = vec![
            Transaction::new(1, 0, 1, 10),
            Transaction::new(2, 1, 2, 20),
            Transaction::new(3, 2, 0, 5),
        ];
        assert_eq!(merkle_root(&txns), merkle_root(&txns.clone()));
        // A different list hashes differently.
        assert_ne!(merkle_root(&txns), merkle_root(&txns[..2]));
        assert_eq!(merkle_root(&[]), "0");
    }

    #[test]
    fn balance_snapshot_applies_transactions() {
        let genesis = Block::genesis(3);
        let txns = vec![Transaction::coinbase(1, 0)];
        let b1 = Block::new(0, txns, &genesis, 1.0);
        assert_eq!(b1.balances, vec![MINING_REWARD as i64, 0, 0]);
        assert_eq!(b1.depth, 1);
        assert_eq!(b1.parent, genesis.blk_id);

        let txns = vec![Transaction::coinbase(2, 1), Transaction::new(3, 0, 2, 30)];
        let b2 = Block::new(1, txns, &b1, 2.0);
        assert_eq!(b2.balances, vec![20, MINING_REWARD as i64, 30]);
        assert_eq!(b2.depth, 2);
    }

    #[test]
    fn block_ids_differ_by_content() {
        let genesis = Block::genesis(2);
        let a = Block::new(0, vec![Transaction::coinbase(1, 0)], &genesis, 1.0);
        let b = Block::new(1, vec![Transaction::coinbase(2, 1)], &genesis, 1.0);
        let c = Block::new(0, vec![Transaction::coinbase(3, 0)], &genesis, 2.0);
        assert_ne!(a.blk_id, b.blk_id);
        assert_ne!(a.blk_id, c.blk_id);
    }

    #[test]
    fn genesis_is_deterministic() {
        assert_eq!(Block::genesis(5), Block::genesis(5));
        assert_eq!(Block::genesis(5).depth, 0);
        assert_eq!(Block::genesis(5).parent, GENESIS_PARENT);
    }
}
