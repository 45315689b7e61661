// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the Simulator: the event dispatch loop and the
/// hash/get/block protocol driver. Handlers mutate exactly one peer and
/// schedule follow-up events; simulated time only advances between pops.
use crate::config::SimConfig;
use crate::event::{Event, EventKind};
use crate::scheduler::EventQueue;
use lib_chain::block::{Block, BlockId, PeerId, Transaction, TxnId, HASH_SIZE_KBITS, TXN_SIZE_KBITS};
use lib_peer::peer::{Channel, Peer};
use log::{debug, info};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use rand_pcg::Pcg64;

pub struct Simulator {
    peers: Vec<Peer>,
    ringmaster: Option<PeerId>,
    config: SimConfig,
    queue: EventQueue,
    rng: Pcg64,
    /// Dense transaction-id counter, shared by coinbase and transfer
    /// transactions so peers can deduplicate with a watermark.
    next_txn_id: TxnId,
    /// Set when the finalize event fires; block and transaction production
    /// stops and the queue drains.
    soft_termination: bool,
}

impl Simulator {
    pub fn new(
        peers: Vec<Peer>,
        ringmaster: Option<PeerId>,
        config: SimConfig,
        rng: Pcg64,
    ) -> Simulator {
        Simulator {
            peers,
            ringmaster,
            config,
            queue: EventQueue::new(),
            rng,
            next_txn_id: 0,
            soft_termination: false,
        }
    }

    /// Run the simulation to completion: seed per-peer generation events and
    /// the finalize event at the horizon, then pop until the queue is empty.
    pub fn run(&mut self) {
        for peer_id in 0..self.peers.len() {
            self.schedule_transaction_generation(peer_id);
            self.schedule_block_generation(peer_id);
        }

        let finalize_target = self.ringmaster.unwrap_or(0);
        self.queue.schedule(
            Event {
                peer: finalize_target,
                sender: None,
                kind: EventKind::Finalize,
            },
            self.config.sim_time,
        );

        info!(
            "running {} peers until t={}s",
            self.peers.len(),
            self.config.sim_time
        );
        while let Some(event) = self.queue.pop() {
            if self.soft_termination && !event.kind.survives_drain() {
                continue;
            }
            self.dispatch(event);
        }
        info!("event queue drained at t={:.2}s", self.queue.now());
    }

    /// Hand the finished peers back for artifact writing.
    pub fn into_peers(self) -> Vec<Peer> {
        self.peers
    }

    fn dispatch(&mut self, event: Event) {
        match event.kind {
            EventKind::BlockGenerate { .. } => self.process_block_generation(event),
            EventKind::HashPropagate { .. } => self.process_hash_propagation(event),
            EventKind::GetRequest { .. } => self.process_get_request(event),
            EventKind::Timeout { .. } => self.process_timeout(event),
            EventKind::BlockPropagate { .. } => self.process_block_propagation(event),
            EventKind::BroadcastPrivateChain { .. } => self.process_broadcast(event),
            EventKind::TransactionGenerate => self.process_transaction_generation(event),
            EventKind::TransactionPropagate { .. } => self.process_transaction_propagation(event),
            EventKind::Finalize => self.process_finalize(event),
        }
    }

    fn allocate_txn_id(&mut self) -> TxnId {
        self.next_txn_id += 1;
        self.next_txn_id
    }

    /// Transmission delay in seconds of a `size_kbits` payload over a link
    /// with propagation delay `pij` (ms) and speed `cij` (kbps): propagation
    /// plus serialization plus exponential queueing noise of mean `96/cij`.
    fn transmission_delay(&mut self, pij: f64, cij: f64, size_kbits: f64) -> f64 {
        let queueing = Exp::new(cij / 96.0).unwrap().sample(&mut self.rng);
        (pij + size_kbits / cij + queueing) / 1000.0
    }

    fn exponential(&mut self, rate: f64) -> f64 {
        Exp::new(rate).unwrap().sample(&mut self.rng)
    }

    // Block generation ----------------------------------------------------

    /// Draw the next mining completion for `peer_id` and pre-assemble the
    /// candidate block on the current tip. Non-mining peers never schedule.
    fn schedule_block_generation(&mut self, peer_id: PeerId) {
        let hashing_power = self.peers[peer_id].hashing_power;
        if hashing_power == 0.0 {
            return;
        }
        let delay = self.exponential(hashing_power / self.config.block_interarrival);
        let coinbase_id = self.allocate_txn_id();

        let peer = &self.peers[peer_id];
        let txns = peer.sample_transactions(coinbase_id);
        let parent = peer.last_block().clone();
        let block = Block::new(peer_id, txns, &parent, self.queue.now());

        self.peers[peer_id].set_mining_parent(parent.blk_id);
        self.queue.schedule(
            Event {
                peer: peer_id,
                sender: None,
                kind: EventKind::BlockGenerate { block },
            },
            delay,
        );
    }

    /// A mining attempt completes. Discarded silently if the tip moved away
    /// from the candidate's parent meanwhile.
    fn process_block_generation(&mut self, event: Event) {
        let EventKind::BlockGenerate { block } = event.kind else {
            unreachable!()
        };
        let peer_id = event.peer;

        if self.peers[peer_id].last_block().blk_id != block.parent {
            return;
        }

        debug!(
            "t={:.3} peer {} mined block {} at depth {}",
            self.queue.now(),
            peer_id,
            &block.blk_id[..8.min(block.blk_id.len())],
            block.depth
        );

        let now = self.queue.now();
        let trigger = self.peers[peer_id].add_block(block.clone(), now);
        if let Some(blk_id) = trigger {
            // Release notices go through the queue so events already pending
            // at this instant keep their insertion order.
            self.queue.schedule(
                Event {
                    peer: peer_id,
                    sender: Some(peer_id),
                    kind: EventKind::BroadcastPrivateChain { blk_id },
                },
                0.0,
            );
        }

        for (target, channel) in self.peers[peer_id].forward_targets(block.creator) {
            self.schedule_hash_propagation(channel, peer_id, target, block.blk_id.clone());
        }

        self.schedule_block_generation(peer_id);
    }

    // Hash phase -----------------------------------------------------------

    fn schedule_hash_propagation(
        &mut self,
        channel: Channel,
        sender: PeerId,
        receiver: PeerId,
        blk_id: BlockId,
    ) {
        let (pij, cij) = self.peers[sender].channel_details(receiver, channel);
        let delay = self.transmission_delay(pij, cij, HASH_SIZE_KBITS);
        self.queue.schedule(
            Event {
                peer: receiver,
                sender: Some(sender),
                kind: EventKind::HashPropagate { blk_id, channel },
            },
            delay,
        );
    }

    fn process_hash_propagation(&mut self, event: Event) {
        let EventKind::HashPropagate { blk_id, channel } = event.kind else {
            unreachable!()
        };
        let peer_id = event.peer;
        let sender = event.sender.expect("hash propagation without sender");

        if self.peers[peer_id].block_seen(&blk_id) {
            return;
        }
        if self.peers[peer_id].add_hash(blk_id.clone(), sender, channel) {
            self.schedule_get_request(channel, peer_id, sender, blk_id);
        }
    }

    // Get phase ------------------------------------------------------------

    /// Schedule the get request plus its paired timeout, and record the
    /// outstanding request at the requester.
    fn schedule_get_request(
        &mut self,
        channel: Channel,
        requester: PeerId,
        target: PeerId,
        blk_id: BlockId,
    ) {
        let (pij, cij) = self.peers[requester].channel_details(target, channel);
        let delay = self.transmission_delay(pij, cij, HASH_SIZE_KBITS);
        self.queue.schedule(
            Event {
                peer: target,
                sender: Some(requester),
                kind: EventKind::GetRequest {
                    blk_id: blk_id.clone(),
                    channel,
                },
            },
            delay,
        );
        self.queue.schedule(
            Event {
                peer: requester,
                sender: None,
                kind: EventKind::Timeout {
                    blk_id: blk_id.clone(),
                    target,
                    channel,
                },
            },
            self.config.timeout,
        );
        self.peers[requester].scheduled_get(target, channel, &blk_id);
    }

    fn process_get_request(&mut self, event: Event) {
        let EventKind::GetRequest { blk_id, channel } = event.kind else {
            unreachable!()
        };
        let server = event.peer;
        let requester = event.sender.expect("get request without requester");

        if let Some(block) = self.peers[server].serve_get(&blk_id, channel) {
            self.schedule_block_propagation(channel, server, requester, block);
        }
    }

    // Timeout phase --------------------------------------------------------

    fn process_timeout(&mut self, event: Event) {
        let EventKind::Timeout {
            blk_id,
            target,
            channel,
        } = event.kind
        else {
            unreachable!()
        };
        let peer_id = event.peer;

        if self.peers[peer_id].block_seen(&blk_id) {
            return;
        }
        if let Some((next, next_channel)) = self.peers[peer_id].hash_timeout(target, channel, &blk_id)
        {
            self.schedule_get_request(next_channel, peer_id, next, blk_id);
        }
    }

    // Block phase ----------------------------------------------------------

    fn schedule_block_propagation(
        &mut self,
        channel: Channel,
        sender: PeerId,
        receiver: PeerId,
        block: Block,
    ) {
        let (pij, cij) = self.peers[sender].channel_details(receiver, channel);
        let delay = self.transmission_delay(pij, cij, block.size_kbits());
        self.queue.schedule(
            Event {
                peer: receiver,
                sender: Some(sender),
                kind: EventKind::BlockPropagate { block, channel },
            },
            delay,
        );
    }

    fn process_block_propagation(&mut self, event: Event) {
        let EventKind::BlockPropagate { block, channel } = event.kind else {
            unreachable!()
        };
        let peer_id = event.peer;
        let sender = event.sender.expect("block propagation without sender");

        self.peers[peer_id].respond_to_get_received(&block.blk_id, sender, channel);
        if self.peers[peer_id].block_seen(&block.blk_id) {
            return;
        }

        let upstream = self.peers[peer_id].all_senders(&block.blk_id);

        let now = self.queue.now();
        let trigger = self.peers[peer_id].add_block(block.clone(), now);
        if let Some(blk_id) = trigger {
            self.queue.schedule(
                Event {
                    peer: peer_id,
                    sender: Some(peer_id),
                    kind: EventKind::BroadcastPrivateChain { blk_id },
                },
                0.0,
            );
        }

        if self.peers[peer_id].mining_restart_needed() {
            self.schedule_block_generation(peer_id);
        }

        // Forward the hash, not the block, and never back to an announcer.
        for (target, forward_channel) in self.peers[peer_id].forward_targets(block.creator) {
            if upstream.contains(&target) {
                continue;
            }
            self.schedule_hash_propagation(forward_channel, peer_id, target, block.blk_id.clone());
        }
    }

    // Private-chain broadcast ----------------------------------------------

    /// A private-chain release notice at a colluder: flood it over the
    /// overlay and announce the surrendered block hashes publicly. Only the
    /// ringmaster actually holds blocks to surrender.
    fn process_broadcast(&mut self, event: Event) {
        let EventKind::BroadcastPrivateChain { blk_id } = event.kind else {
            unreachable!()
        };
        let peer_id = event.peer;

        if self.peers[peer_id].broadcast_seen(&blk_id) {
            return;
        }
        let released = self.peers[peer_id].release_private_chain(&blk_id);
        if !released.is_empty() {
            info!(
                "t={:.3} ringmaster {} released {} private blocks",
                self.queue.now(),
                peer_id,
                released.len()
            );
        }

        for (target, channel) in self.peers[peer_id].overlay_targets() {
            if Some(target) == event.sender {
                continue;
            }
            let (pij, cij) = self.peers[peer_id].channel_details(target, channel);
            let delay = self.transmission_delay(pij, cij, HASH_SIZE_KBITS);
            self.queue.schedule(
                Event {
                    peer: target,
                    sender: Some(peer_id),
                    kind: EventKind::BroadcastPrivateChain {
                        blk_id: blk_id.clone(),
                    },
                },
                delay,
            );
        }

        for released_id in released {
            for (target, channel) in self.peers[peer_id].public_targets() {
                self.schedule_hash_propagation(channel, peer_id, target, released_id.clone());
            }
        }
    }

    // Transactions ---------------------------------------------------------

    fn schedule_transaction_generation(&mut self, peer_id: PeerId) {
        let delay = self.exponential(1.0 / self.config.txn_interarrival);
        self.queue.schedule(
            Event {
                peer: peer_id,
                sender: None,
                kind: EventKind::TransactionGenerate,
            },
            delay,
        );
    }

    /// Draw a transfer of a uniform amount to a uniform other peer, if the
    /// generating peer has any balance on its tip.
    fn process_transaction_generation(&mut self, event: Event) {
        let peer_id = event.peer;

        let balance = self.peers[peer_id].balance_on_tip();
        if balance <= 0 {
            self.schedule_transaction_generation(peer_id);
            return;
        }
        let amount = self.rng.gen_range(1..=balance as u64);
        let receiver = {
            let other = self.rng.gen_range(0..self.peers.len() - 1);
            if other >= peer_id {
                other + 1
            } else {
                other
            }
        };
        let txn = Transaction::new(self.allocate_txn_id(), peer_id, receiver, amount);

        self.peers[peer_id].add_txn_to_mempool(txn.clone());
        for (target, channel) in self.peers[peer_id].forward_targets(None) {
            self.schedule_transaction_propagation(channel, peer_id, target, txn.clone());
        }

        self.schedule_transaction_generation(peer_id);
    }

    fn schedule_transaction_propagation(
        &mut self,
        channel: Channel,
        sender: PeerId,
        receiver: PeerId,
        txn: Transaction,
    ) {
        let (pij, cij) = self.peers[sender].channel_details(receiver, channel);
        let delay = self.transmission_delay(pij, cij, TXN_SIZE_KBITS);
        self.queue.schedule(
            Event {
                peer: receiver,
                sender: Some(sender),
                kind: EventKind::TransactionPropagate { txn, channel },
            },
            delay,
        );
    }

    /// Flood-fill a transaction: first sight goes to the mempool and onward
    /// to every connection except the one it came from. The transaction is
    /// not validated here, since the sender may sit on a different branch.
    fn process_transaction_propagation(&mut self, event: Event) {
        let EventKind::TransactionPropagate { txn, .. } = event.kind else {
            unreachable!()
        };
        let peer_id = event.peer;

        if self.peers[peer_id].transaction_seen(&txn) {
            return;
        }
        self.peers[peer_id].add_txn_to_mempool(txn.clone());

        for (target, channel) in self.peers[peer_id].forward_targets(None) {
            if Some(target) == event.sender {
                continue;
            }
            self.schedule_transaction_propagation(channel, peer_id, target, txn.clone());
        }
    }

    // Finalization ---------------------------------------------------------

    /// The horizon was reached: stop admitting new work and let the
    /// ringmaster surrender whatever private chain it still holds, so honest
    /// peers observe it during the drain.
    fn process_finalize(&mut self, event: Event) {
        self.soft_termination = true;
        info!("t={:.3} horizon reached, draining", self.queue.now());

        if let Some(blk_id) = self.peers[event.peer].last_private_block_id() {
            self.queue.schedule(
                Event {
                    peer: event.peer,
                    sender: Some(event.peer),
                    kind: EventKind::BroadcastPrivateChain { blk_id },
                },
                0.0,
            );
        }
    }
}
