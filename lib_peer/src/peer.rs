// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the definition of the Peer.
/// A Peer is the per-node protocol state: its links, its mempool, its view of
/// the chain, and the bookkeeping for the hash/get/block exchange. Honest,
/// colluding and ringmaster peers share one struct; behaviour that differs by
/// role is dispatched on `PeerRole`.
use lib_chain::block::{Block, BlockId, PeerId, Transaction, TxnId};
use lib_chain::blocktree::BlockTree;
use lib_chain::malicious::MaliciousBlockTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Maximum number of transactions in one mined block, coinbase included.
pub const MAX_TXNS_PER_BLOCK: usize = 1000;

/// Network speed class of a peer. Both endpoints must be fast for a public
/// link to run at the fast rate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Slow,
    Fast,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NetworkType::Slow => write!(f, "SLOW"),
            NetworkType::Fast => write!(f, "FAST"),
        }
    }
}

/// CPU performance class of a peer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuType {
    Low,
    High,
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CpuType::Low => write!(f, "LOW"),
            CpuType::High => write!(f, "HIGH"),
        }
    }
}

/// Role of a peer in the network. The ringmaster is the colluder that pools
/// the whole malicious hashing power and runs the private chain.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Honest,
    Malicious,
    Ringmaster,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeerRole::Honest => write!(f, "Honest"),
            PeerRole::Malicious => write!(f, "Malicious"),
            PeerRole::Ringmaster => write!(f, "Ringmaster"),
        }
    }
}

/// The channel a message travels on. Every colluder pair additionally shares
/// an overlay link with its own delay and bandwidth.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Public,
    Overlay,
}

/// Tracks received transaction ids to suppress duplicates.
/// Ids are issued densely, so a prefix watermark plus a small out-of-order
/// set replaces a full seen-set.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RepeatChecker {
    /// Highest id such that every id at or below it has been seen.
    threshold: TxnId,
    /// Seen ids above the threshold.
    seen: HashSet<TxnId>,
}

impl RepeatChecker {
    pub fn check(&self, id: TxnId) -> bool {
        id <= self.threshold || self.seen.contains(&id)
    }

    /// Record an id. Returns false if it was a duplicate.
    pub fn add(&mut self, id: TxnId) -> bool {
        if self.check(id) {
            return false;
        }
        self.seen.insert(id);
        while self.seen.remove(&(self.threshold + 1)) {
            self.threshold += 1;
        }
        true
    }
}

/// Bookkeeping for one block hash the peer has heard about but whose block it
/// has not received yet. Dropped once the block arrives.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HashRecord {
    /// Every announcer of this hash, in arrival order, timed-out ones included.
    pub all_senders: Vec<(PeerId, Channel)>,
    /// Announcers not yet asked for the block.
    pub passive_senders: Vec<(PeerId, Channel)>,
    /// Announcers with an outstanding get whose timeout has not fired.
    /// At most one entry unless the counter measure is enabled.
    pub active_senders: Vec<(PeerId, Channel)>,
}

/// Per-link attributes for one channel of a peer.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LinkTable {
    pub neighbors: Vec<PeerId>,
    pub delay_ms: HashMap<PeerId, f64>,
    pub speed_kbps: HashMap<PeerId, f64>,
}

impl LinkTable {
    pub fn connect(&mut self, peer: PeerId, delay_ms: f64, speed_kbps: f64) {
        self.neighbors.push(peer);
        self.delay_ms.insert(peer, delay_ms);
        self.speed_kbps.insert(peer, speed_kbps);
    }

    /// `(propagation delay ms, link speed kbps)` of the link to `peer`.
    pub fn details(&self, peer: PeerId) -> (f64, f64) {
        (self.delay_ms[&peer], self.speed_kbps[&peer])
    }
}

/// The chain view held by a peer. Colluders carry the malicious tree even
/// when their own private chain stays empty, so the ringmaster tie break and
/// the broadcast bookkeeping apply to all of them.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ChainView {
    Honest(BlockTree),
    Malicious(MaliciousBlockTree),
}

impl ChainView {
    pub fn seen(&self, blk_id: &str) -> bool {
        match self {
            ChainView::Honest(tree) => tree.seen(blk_id),
            ChainView::Malicious(m) => m.seen(blk_id),
        }
    }

    pub fn get_block(&self, blk_id: &str) -> Option<&Block> {
        match self {
            ChainView::Honest(tree) => tree.get_block(blk_id),
            ChainView::Malicious(m) => m.get_block(blk_id),
        }
    }

    /// The public tree, for both views.
    pub fn tree(&self) -> &BlockTree {
        match self {
            ChainView::Honest(tree) => tree,
            ChainView::Malicious(m) => &m.tree,
        }
    }

    fn tree_mut(&mut self) -> &mut BlockTree {
        match self {
            ChainView::Honest(tree) => tree,
            ChainView::Malicious(m) => &mut m.tree,
        }
    }
}

/// One node of the simulated network.
pub struct Peer {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub net_type: NetworkType,
    pub cpu_type: CpuType,
    /// Share of the total hashing power in [0, 1]. Zero means non-mining.
    pub hashing_power: f64,
    /// Public links, present on every peer.
    pub links: LinkTable,
    /// Overlay links to the other colluders. Empty for honest peers.
    pub overlay_links: LinkTable,
    pub chain: ChainView,
    /// Pending transactions, ordered by id for deterministic block assembly.
    pub mempool: BTreeMap<TxnId, Transaction>,
    txn_checker: RepeatChecker,
    received_hashes: HashMap<BlockId, HashRecord>,
    /// For each public neighbor, block ids requested from it and not yet
    /// delivered. Feeds the trust decision of the counter measure.
    pending_requests: HashMap<PeerId, HashSet<BlockId>>,
    /// Parent id of the block this peer is currently mining on, if any.
    mining_parent: Option<BlockId>,
    /// Id of the ringmaster, known to colluders only.
    ringmaster_id: Option<PeerId>,
    counter_measure: bool,
    /// Whether this colluder withholds honest blocks on public get requests.
    eclipse: bool,
}

impl Peer {
    pub fn new_honest(
        peer_id: PeerId,
        net_type: NetworkType,
        cpu_type: CpuType,
        hashing_power: f64,
        genesis: Block,
        counter_measure: bool,
    ) -> Peer {
        Peer {
            peer_id,
            role: PeerRole::Honest,
            net_type,
            cpu_type,
            hashing_power,
            links: LinkTable::default(),
            overlay_links: LinkTable::default(),
            chain: ChainView::Honest(BlockTree::new(genesis)),
            mempool: BTreeMap::new(),
            txn_checker: RepeatChecker::default(),
            received_hashes: HashMap::new(),
            pending_requests: HashMap::new(),
            mining_parent: None,
            ringmaster_id: None,
            counter_measure,
            eclipse: false,
        }
    }

    pub fn new_malicious(
        peer_id: PeerId,
        net_type: NetworkType,
        cpu_type: CpuType,
        hashing_power: f64,
        genesis: Block,
        ringmaster: PeerId,
        eclipse: bool,
        counter_measure: bool,
    ) -> Peer {
        let role = if peer_id == ringmaster {
            PeerRole::Ringmaster
        } else {
            PeerRole::Malicious
        };
        Peer {
            peer_id,
            role,
            net_type,
            cpu_type,
            hashing_power,
            links: LinkTable::default(),
            overlay_links: LinkTable::default(),
            chain: ChainView::Malicious(MaliciousBlockTree::new(genesis, ringmaster)),
            mempool: BTreeMap::new(),
            txn_checker: RepeatChecker::default(),
            received_hashes: HashMap::new(),
            pending_requests: HashMap::new(),
            mining_parent: None,
            ringmaster_id: Some(ringmaster),
            counter_measure,
            eclipse,
        }
    }

    pub fn add_public_link(&mut self, peer: PeerId, delay_ms: f64, speed_kbps: f64) {
        self.links.connect(peer, delay_ms, speed_kbps);
        self.pending_requests.insert(peer, HashSet::new());
    }

    pub fn add_overlay_link(&mut self, peer: PeerId, delay_ms: f64, speed_kbps: f64) {
        self.overlay_links.connect(peer, delay_ms, speed_kbps);
    }

    pub fn block_seen(&self, blk_id: &str) -> bool {
        self.chain.seen(blk_id)
    }

    pub fn transaction_seen(&self, txn: &Transaction) -> bool {
        self.txn_checker.check(txn.txn_id)
    }

    pub fn add_txn_to_mempool(&mut self, txn: Transaction) {
        self.txn_checker.add(txn.txn_id);
        self.mempool.insert(txn.txn_id, txn);
    }

    /// Record an announcement of `blk_id` by `(sender, channel)`.
    /// Returns true when a get request should be issued to that sender now:
    /// without the counter measure, when no get is outstanding; with it, when
    /// none of the currently active senders can be trusted to deliver.
    pub fn add_hash(&mut self, blk_id: BlockId, sender: PeerId, channel: Channel) -> bool {
        {
            let record = self.received_hashes.entry(blk_id.clone()).or_default();
            record.passive_senders.push((sender, channel));
            record.all_senders.push((sender, channel));
        }

        let record = &self.received_hashes[&blk_id];
        if self.counter_measure {
            !record
                .active_senders
                .iter()
                .any(|&(peer, ch)| self.trust_on_peer(peer, ch))
        } else {
            record.active_senders.is_empty()
        }
    }

    /// Counter-measure trust check: overlay links are always trusted, and a
    /// public neighbor is trusted only while every block we are waiting on
    /// from it is one it is legitimately serving us right now.
    fn trust_on_peer(&self, peer: PeerId, channel: Channel) -> bool {
        if channel == Channel::Overlay {
            return true;
        }
        self.pending_requests.get(&peer).map_or(true, |pending| {
            pending.iter().all(|blk_id| {
                self.received_hashes
                    .get(blk_id)
                    .map_or(false, |record| record.active_senders.contains(&(peer, channel)))
            })
        })
    }

    /// Note that a get request for `blk_id` has been scheduled towards
    /// `(target, channel)`.
    pub fn scheduled_get(&mut self, target: PeerId, channel: Channel, blk_id: &BlockId) {
        let record = self
            .received_hashes
            .get_mut(blk_id)
            .expect("get scheduled for a hash that was never announced");
        let pos = record
            .passive_senders
            .iter()
            .position(|&entry| entry == (target, channel))
            .expect("get scheduled towards a sender that is not passive");
        record.passive_senders.remove(pos);
        record.active_senders.push((target, channel));

        if channel == Channel::Public {
            self.pending_requests
                .entry(target)
                .or_default()
                .insert(blk_id.clone());
        }
    }

    /// Note that the block requested from `(sender, channel)` was delivered.
    pub fn respond_to_get_received(&mut self, blk_id: &str, sender: PeerId, channel: Channel) {
        if channel == Channel::Public {
            if let Some(pending) = self.pending_requests.get_mut(&sender) {
                pending.remove(blk_id);
            }
        }
    }

    /// A get request towards `(target, channel)` timed out. Returns the next
    /// sender to ask, if any.
    pub fn hash_timeout(
        &mut self,
        target: PeerId,
        channel: Channel,
        blk_id: &BlockId,
    ) -> Option<(PeerId, Channel)> {
        {
            let record = self
                .received_hashes
                .get_mut(blk_id)
                .expect("timeout for a hash that was never announced");
            let pos = record
                .active_senders
                .iter()
                .position(|&entry| entry == (target, channel))
                .expect("timed out sender was not active");
            record.active_senders.remove(pos);
        }

        let record = &self.received_hashes[blk_id];
        if self.counter_measure {
            if record
                .active_senders
                .iter()
                .any(|&(peer, ch)| self.trust_on_peer(peer, ch))
            {
                return None;
            }
            if let Some(&(peer, ch)) = record
                .passive_senders
                .iter()
                .find(|&&(peer, ch)| self.trust_on_peer(peer, ch))
            {
                return Some((peer, ch));
            }
        }

        if !record.active_senders.is_empty() {
            return None;
        }
        record.passive_senders.first().copied()
    }

    /// Every peer that has announced `blk_id`, for loopless forwarding.
    pub fn all_senders(&self, blk_id: &str) -> Vec<PeerId> {
        self.received_hashes
            .get(blk_id)
            .expect("block delivered without any recorded announcement")
            .all_senders
            .iter()
            .map(|&(peer, _)| peer)
            .collect()
    }

    /// Connections a message about a block by `creator` is forwarded on.
    /// Colluders forward on the overlay unconditionally but keep
    /// ringmaster-authored blocks off the public network.
    pub fn forward_targets(&self, creator: Option<PeerId>) -> Vec<(PeerId, Channel)> {
        match self.role {
            PeerRole::Honest => self.public_targets(),
            PeerRole::Malicious | PeerRole::Ringmaster => {
                let mut targets = self.overlay_targets();
                if creator != self.ringmaster_id {
                    targets.extend(self.public_targets());
                }
                targets
            }
        }
    }

    pub fn public_targets(&self) -> Vec<(PeerId, Channel)> {
        self.links
            .neighbors
            .iter()
            .map(|&peer| (peer, Channel::Public))
            .collect()
    }

    pub fn overlay_targets(&self) -> Vec<(PeerId, Channel)> {
        self.overlay_links
            .neighbors
            .iter()
            .map(|&peer| (peer, Channel::Overlay))
            .collect()
    }

    /// `(propagation delay ms, link speed kbps)` towards `peer` on `channel`.
    pub fn channel_details(&self, peer: PeerId, channel: Channel) -> (f64, f64) {
        match channel {
            Channel::Public => self.links.details(peer),
            Channel::Overlay => self.overlay_links.details(peer),
        }
    }

    /// Answer a get request, or withhold. A colluder under an active eclipse
    /// stonewalls public requests for blocks not authored by the ringmaster;
    /// the overlay and ringmaster-authored blocks are always served.
    pub fn serve_get(&self, blk_id: &str, channel: Channel) -> Option<Block> {
        let block = self
            .chain
            .get_block(blk_id)
            .expect("got get request for block, but don't have block");

        match self.role {
            PeerRole::Honest => Some(block.clone()),
            PeerRole::Malicious | PeerRole::Ringmaster => {
                if self.eclipse
                    && channel == Channel::Public
                    && block.creator != self.ringmaster_id
                {
                    None
                } else {
                    Some(block.clone())
                }
            }
        }
    }

    /// Add a received or self-mined block. The ringmaster diverts its own
    /// blocks into the private chain; every other add goes through the public
    /// tree followed by mempool reconciliation. Returns the id up to which
    /// the private chain should be broadcast, if the release rule fired.
    pub fn add_block(&mut self, block: Block, arr_time: f64) -> Option<BlockId> {
        self.received_hashes.remove(&block.blk_id);

        if self.role == PeerRole::Ringmaster && block.creator == Some(self.peer_id) {
            match &mut self.chain {
                ChainView::Malicious(m) => {
                    m.add_selfish_block(block, arr_time);
                    return None;
                }
                ChainView::Honest(_) => unreachable!("ringmaster holds a malicious tree"),
            }
        }

        self.chain.tree_mut().add_block(block, arr_time);
        self.reconcile_mempool();

        match (&self.chain, self.role) {
            (ChainView::Malicious(m), PeerRole::Ringmaster) => m.release_after_external(),
            _ => None,
        }
    }

    /// After a fork switch, move transactions of the orphaned branch back
    /// into the mempool and drop the ones confirmed on the new chain.
    fn reconcile_mempool(&mut self) {
        let tree = self.chain.tree();
        let lca = match &tree.prev_tip {
            Some(prev) => tree.lca(&tree.longest_tip, prev),
            None => tree.genesis_id.clone(),
        };
        let to_readd = match &tree.prev_tip {
            Some(prev) => tree.txn_set(prev, &lca),
            None => BTreeMap::new(),
        };
        let to_remove = tree.txn_set(&tree.longest_tip, &lca);

        self.mempool.extend(to_readd);
        for txn_id in to_remove.keys() {
            self.mempool.remove(txn_id);
        }
    }

    pub fn set_mining_parent(&mut self, blk_id: BlockId) {
        self.mining_parent = Some(blk_id);
    }

    /// Whether the chain tip moved away from the block this peer was mining
    /// on, so a fresh mining attempt should be scheduled.
    pub fn mining_restart_needed(&self) -> bool {
        match &self.mining_parent {
            None => true,
            Some(parent) => *parent != self.last_block().blk_id,
        }
    }

    /// The block to mine on: the longest-chain tip, except that the
    /// ringmaster extends its private chain while that is deeper.
    pub fn last_block(&self) -> &Block {
        match &self.chain {
            ChainView::Honest(tree) => tree.tip_block(),
            ChainView::Malicious(m) => {
                let tip = m.tree.tip_block();
                match m.last_private_block() {
                    Some(private) if private.depth > tip.depth => private,
                    _ => tip,
                }
            }
        }
    }

    /// This peer's coin balance at the block it would mine on.
    pub fn balance_on_tip(&self) -> i64 {
        self.last_block().balances[self.peer_id]
    }

    /// Assemble the transaction list for a mining attempt: coinbase first,
    /// then mempool transactions in id order, skipping any that would
    /// overdraw its sender against the tip snapshot.
    pub fn sample_transactions(&self, coinbase_id: TxnId) -> Vec<Transaction> {
        let balances = &self.last_block().balances;
        let mut spent = vec![0i64; balances.len()];
        let mut txns = vec![Transaction::coinbase(coinbase_id, self.peer_id)];

        for txn in self.mempool.values() {
            let sender = match txn.sender {
                Some(sender) => sender,
                None => continue,
            };
            if spent[sender] + txn.amount as i64 > balances[sender] {
                continue;
            }
            spent[sender] += txn.amount as i64;
            txns.push(txn.clone());
            if txns.len() == MAX_TXNS_PER_BLOCK {
                break;
            }
        }
        txns
    }

    /// Whether a private-chain broadcast notice was already processed here.
    pub fn broadcast_seen(&self, blk_id: &str) -> bool {
        match &self.chain {
            ChainView::Malicious(m) => m.check_broadcast(blk_id),
            ChainView::Honest(_) => panic!("private-chain broadcast reached an honest peer"),
        }
    }

    /// Pull the private chain up through `blk_id` into the public tree and
    /// return the released block ids, oldest first. Empty for colluders that
    /// hold no private blocks.
    pub fn release_private_chain(&mut self, blk_id: &BlockId) -> Vec<BlockId> {
        match &mut self.chain {
            ChainView::Malicious(m) => {
                let released = m.take_private_chain(blk_id);
                let ids = released
                    .iter()
                    .map(|(block, _)| block.blk_id.clone())
                    .collect();
                for (block, arr_time) in released {
                    m.tree.add_block(block, arr_time);
                }
                ids
            }
            ChainView::Honest(_) => panic!("private-chain broadcast reached an honest peer"),
        }
    }

    pub fn last_private_block_id(&self) -> Option<BlockId> {
        match &self.chain {
            ChainView::Malicious(m) => m.last_private_block().map(|block| block.blk_id.clone()),
            ChainView::Honest(_) => None,
        }
    }
}
