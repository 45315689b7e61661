// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the definition of the simulation events.
/// Every event targets exactly one peer; its handler mutates only that peer's
/// state and may schedule further events.
use lib_chain::block::{Block, BlockId, PeerId, Transaction};
use lib_peer::peer::Channel;

#[derive(Debug, Clone)]
pub enum EventKind {
    /// A mining attempt completes with the pre-assembled candidate block.
    BlockGenerate { block: Block },
    /// A block hash announcement arrives.
    HashPropagate { blk_id: BlockId, channel: Channel },
    /// A request for the full block arrives at the announcer.
    GetRequest { blk_id: BlockId, channel: Channel },
    /// The get request towards `target` went unanswered for the timeout span.
    Timeout {
        blk_id: BlockId,
        target: PeerId,
        channel: Channel,
    },
    /// The full block arrives at the requester.
    BlockPropagate { block: Block, channel: Channel },
    /// Overlay notice that the private chain up through `blk_id` goes public.
    BroadcastPrivateChain { blk_id: BlockId },
    /// The peer draws a fresh transaction.
    TransactionGenerate,
    /// A flooded transaction arrives.
    TransactionPropagate { txn: Transaction, channel: Channel },
    /// The simulation horizon was reached: switch to drain mode.
    Finalize,
}

impl EventKind {
    /// Whether this event is still serviced after the horizon. Work that
    /// creates new blocks or transactions is dropped; in-flight network
    /// completion keeps running until the queue empties.
    pub fn survives_drain(&self) -> bool {
        !matches!(
            self,
            EventKind::BlockGenerate { .. }
                | EventKind::TransactionGenerate
                | EventKind::TransactionPropagate { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    /// The peer whose handler runs when this event fires.
    pub peer: PeerId,
    /// The peer a propagation message came from, for loopless forwarding.
    /// `None` for self-scheduled events.
    pub sender: Option<PeerId>,
    pub kind: EventKind,
}
