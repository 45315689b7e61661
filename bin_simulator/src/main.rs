// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

// This file implements the simulator entry point.
// It parses the simulation parameters, builds the peer population and the
// topologies, runs the event loop to completion and dumps the CSV artifacts.

use anyhow::Context;
use clap::Parser;
use lib_sim::config::SimConfig;
use lib_sim::output::write_artifacts;
use lib_sim::setup::build_population;
use lib_sim::simulator::Simulator;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::path::PathBuf;

/// Discrete-event simulation of selfish mining and eclipse attacks on a
/// proof-of-work peer-to-peer network.
#[derive(Parser, Debug)]
#[command(name = "bin_simulator")]
struct Cli {
    /// Total number of peers.
    #[arg(short = 'n', long)]
    num_peers: usize,

    /// Fraction of malicious peers, in [0, 1].
    #[arg(short = 'm', long)]
    ratio_malicious: f64,

    /// Get-request timeout in seconds.
    #[arg(short = 'o', long)]
    timeout: f64,

    /// Mean interarrival time of transactions per peer, in seconds.
    #[arg(short = 't', long)]
    transaction_interarrival: f64,

    /// Mean interarrival time of blocks, in seconds.
    #[arg(short = 'b', long)]
    block_interarrival: f64,

    /// Simulation horizon in seconds.
    #[arg(short = 's', long)]
    sim_time: f64,

    /// Folder to store results; derived from the parameters when omitted.
    #[arg(short = 'f', long)]
    folder: Option<PathBuf>,

    /// Remove the eclipse attack from malicious nodes (selfish mining only).
    #[arg(short = 'r', long)]
    remove_eclipse: bool,

    /// Enable the counter measure in honest nodes against the eclipse attack.
    #[arg(short = 'c', long)]
    counter_measure: bool,

    /// Seed of the random generator driving the whole run.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = SimConfig {
        num_peers: cli.num_peers,
        ratio_malicious: cli.ratio_malicious,
        txn_interarrival: cli.transaction_interarrival,
        block_interarrival: cli.block_interarrival,
        timeout: cli.timeout,
        sim_time: cli.sim_time,
        remove_eclipse: cli.remove_eclipse,
        counter_measure: cli.counter_measure,
    };
    config.validate()?;

    let folder = cli
        .folder
        .unwrap_or_else(|| PathBuf::from(config.default_folder()));

    let mut rng = Pcg64::seed_from_u64(cli.seed);
    let population = build_population(&config, &mut rng);
    let public_edges = population.public_edges;
    let overlay_edges = population.overlay_edges;

    let mut simulator = Simulator::new(
        population.peers,
        population.ringmaster,
        config.clone(),
        rng,
    );
    simulator.run();
    let peers = simulator.into_peers();

    write_artifacts(&folder, &config, &peers, &public_edges, &overlay_edges)
        .context("failed to write the run artifacts")?;
    log::info!("results stored in {}", folder.display());
    Ok(())
}
