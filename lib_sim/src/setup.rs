// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the peer-population setup.
/// It assigns roles, classes and hashing power, generates the public and
/// overlay topologies and wires the link attributes into the peers.
use crate::config::SimConfig;
use lib_chain::block::{Block, PeerId};
use lib_network::topology::random_connected_graph;
use lib_peer::peer::{CpuType, NetworkType, Peer};
use rand::seq::SliceRandom;
use rand::Rng;

/// Public link speed in kbps when both endpoints are fast, and otherwise.
const FAST_LINK_KBPS: f64 = 100.0;
const SLOW_LINK_KBPS: f64 = 5.0;

/// The constructed network, ready to simulate.
pub struct Population {
    pub peers: Vec<Peer>,
    /// The distinguished colluder holding the pooled hashing power, absent
    /// when the malicious ratio floors to zero.
    pub ringmaster: Option<PeerId>,
    pub public_edges: Vec<(PeerId, PeerId)>,
    pub overlay_edges: Vec<(PeerId, PeerId)>,
}

/// Build the peer population for `config`, drawing the malicious subset, the
/// topologies and the link attributes from `rng`.
pub fn build_population<R: Rng>(config: &SimConfig, rng: &mut R) -> Population {
    let n = config.num_peers;
    let num_malicious = config.num_malicious();

    let mut shuffled: Vec<PeerId> = (0..n).collect();
    shuffled.shuffle(rng);
    let mut malicious_ids: Vec<PeerId> = shuffled[..num_malicious].to_vec();
    malicious_ids.sort_unstable();
    let ringmaster = malicious_ids.first().copied();

    // One normalized share per peer; colluders hand theirs to the ringmaster.
    let base_share = 1.0 / n as f64;
    let genesis = Block::genesis(n);

    let mut peers: Vec<Peer> = (0..n)
        .map(|peer_id| {
            if malicious_ids.contains(&peer_id) {
                let rm = ringmaster.unwrap();
                let hashing_power = if peer_id == rm {
                    base_share * num_malicious as f64
                } else {
                    0.0
                };
                Peer::new_malicious(
                    peer_id,
                    NetworkType::Fast,
                    CpuType::High,
                    hashing_power,
                    genesis.clone(),
                    rm,
                    !config.remove_eclipse,
                    config.counter_measure,
                )
            } else {
                Peer::new_honest(
                    peer_id,
                    NetworkType::Slow,
                    CpuType::High,
                    base_share,
                    genesis.clone(),
                    config.counter_measure,
                )
            }
        })
        .collect();

    let all_ids: Vec<PeerId> = (0..n).collect();
    let public_edges = random_connected_graph(&all_ids, rng);
    for &(u, v) in &public_edges {
        let delay_ms = rng.gen_range(10.0..500.0);
        let both_fast =
            peers[u].net_type == NetworkType::Fast && peers[v].net_type == NetworkType::Fast;
        let speed = if both_fast { FAST_LINK_KBPS } else { SLOW_LINK_KBPS };
        peers[u].add_public_link(v, delay_ms, speed);
        peers[v].add_public_link(u, delay_ms, speed);
    }

    let overlay_edges = random_connected_graph(&malicious_ids, rng);
    for &(u, v) in &overlay_edges {
        let delay_ms = rng.gen_range(1.0..10.0);
        peers[u].add_overlay_link(v, delay_ms, FAST_LINK_KBPS);
        peers[v].add_overlay_link(u, delay_ms, FAST_LINK_KBPS);
    }

    Population {
        peers,
        ringmaster,
        public_edges,
        overlay_edges,
    }
}
