// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the artifact writers.
/// At the end of a run the network description and every peer's verified
/// block tree are dumped as CSV files for the downstream analysis tools.
use crate::config::{SimConfig, SimError};
use lib_peer::peer::{Channel, Peer};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write every artifact of a finished run into `folder` (created if absent):
/// `Node_info.csv`, `networkGraph.csv`, `overlayGraph.csv`, one
/// `Peer_<id>.csv` per peer and `config.txt`.
pub fn write_artifacts(
    folder: &Path,
    config: &SimConfig,
    peers: &[Peer],
    public_edges: &[(usize, usize)],
    overlay_edges: &[(usize, usize)],
) -> Result<(), SimError> {
    fs::create_dir_all(folder)?;

    write_node_info(&folder.join("Node_info.csv"), peers)?;
    write_graph(
        &folder.join("networkGraph.csv"),
        peers,
        public_edges,
        Channel::Public,
    )?;
    write_graph(
        &folder.join("overlayGraph.csv"),
        peers,
        overlay_edges,
        Channel::Overlay,
    )?;
    for peer in peers {
        write_peer_tree(&folder.join(format!("Peer_{}.csv", peer.peer_id)), peer)?;
    }
    write_config(&folder.join("config.txt"), config)?;
    Ok(())
}

fn write_node_info(path: &Path, peers: &[Peer]) -> Result<(), SimError> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "PeerId, Peer-Type, CPU-Type, Network-Type, Hashing-Power")?;
    for peer in peers {
        writeln!(
            file,
            "{}, {}, {}, {}, {}",
            peer.peer_id, peer.role, peer.cpu_type, peer.net_type, peer.hashing_power
        )?;
    }
    Ok(())
}

fn write_graph(
    path: &Path,
    peers: &[Peer],
    edges: &[(usize, usize)],
    channel: Channel,
) -> Result<(), SimError> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "Peer 1, Peer 2, Propagation-Delay, Link-Speed")?;
    for &(u, v) in edges {
        let (delay_ms, speed_kbps) = peers[u].channel_details(v, channel);
        writeln!(file, "{}, {}, {:.2}, {}", u, v, delay_ms, speed_kbps)?;
    }
    Ok(())
}

/// One row per verified block, sorted by arrival time. Dangling and
/// discarded blocks are omitted.
fn write_peer_tree(path: &Path, peer: &Peer) -> Result<(), SimError> {
    let tree = peer.chain.tree();

    let mut rows: Vec<(&String, f64)> = tree
        .arrival
        .iter()
        .map(|(blk_id, &at)| (blk_id, at))
        .collect();
    rows.sort_by(|(id_a, at_a), (id_b, at_b)| at_a.total_cmp(at_b).then_with(|| id_a.cmp(id_b)));

    let mut file = BufWriter::new(File::create(path)?);
    writeln!(
        file,
        "BlockId, ParentId, creatorId, Arrival Time, Depth, Block-Size"
    )?;
    for (blk_id, at) in rows {
        if !tree.verified.contains(blk_id) {
            continue;
        }
        let block = &tree.seen_blocks[blk_id];
        let creator = block.creator.map(|id| id as i64).unwrap_or(-1);
        writeln!(
            file,
            "{}, {}, {}, {:.2}, {}, {}",
            blk_id,
            block.parent,
            creator,
            at,
            block.depth,
            block.txns.len() * 8
        )?;
    }
    Ok(())
}

fn write_config(path: &Path, config: &SimConfig) -> Result<(), SimError> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "Remove Eclipse Attack -> {}", config.remove_eclipse)?;
    writeln!(file, "Counter Measure -> {}", config.counter_measure)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_chain::block::Block;
    use lib_peer::peer::{CpuType, NetworkType};

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("sim_output_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn artifacts_have_the_expected_headers() {
        let config = SimConfig {
            num_peers: 2,
            ratio_malicious: 0.0,
            txn_interarrival: 2.0,
            block_interarrival: 10.0,
            timeout: 1.0,
            sim_time: 10.0,
            remove_eclipse: true,
            counter_measure: false,
        };
        let mut a = Peer::new_honest(0, NetworkType::Fast, CpuType::High, 0.5, Block::genesis(2), false);
        let mut b = Peer::new_honest(1, NetworkType::Slow, CpuType::High, 0.5, Block::genesis(2), false);
        a.add_public_link(1, 25.0, 5.0);
        b.add_public_link(0, 25.0, 5.0);

        let dir = scratch_dir("headers");
        write_artifacts(&dir, &config, &[a, b], &[(0, 1)], &[]).unwrap();

        let node_info = fs::read_to_string(dir.join("Node_info.csv")).unwrap();
        assert!(node_info.starts_with("PeerId, Peer-Type, CPU-Type, Network-Type, Hashing-Power"));
        assert!(node_info.contains("0, Honest, HIGH, FAST, 0.5"));

        let graph = fs::read_to_string(dir.join("networkGraph.csv")).unwrap();
        assert!(graph.starts_with("Peer 1, Peer 2, Propagation-Delay, Link-Speed"));
        assert!(graph.contains("0, 1, 25.00, 5"));

        let tree = fs::read_to_string(dir.join("Peer_0.csv")).unwrap();
        let mut lines = tree.lines();
        assert_eq!(
            lines.next(),
            Some("BlockId, ParentId, creatorId, Arrival Time, Depth, Block-Size")
        );
        // Genesis row: parent -1, creator -1, no transactions.
        assert!(lines.next().unwrap().ends_with("-1, -1, 0.00, 0, 0"));

        let config_txt = fs::read_to_string(dir.join("config.txt")).unwrap();
        assert_eq!(
            config_txt,
            "Remove Eclipse Attack -> true\nCounter Measure -> false\n"
        );

        fs::remove_dir_all(&dir).unwrap();
    }
}
