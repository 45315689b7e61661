// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the simulation configuration and its validation.
/// A bad configuration is rejected before any event is scheduled.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Total number of peers in the network.
    pub num_peers: usize,
    /// Fraction of peers that collude, in [0, 1]. May floor to zero
    /// colluders, which degrades the run to an honest-only baseline.
    pub ratio_malicious: f64,
    /// Mean interarrival time of transactions per peer, seconds.
    pub txn_interarrival: f64,
    /// Mean interarrival time of blocks across the network, seconds.
    pub block_interarrival: f64,
    /// Span after which an unanswered get request falls back, seconds.
    pub timeout: f64,
    /// Simulation horizon, seconds.
    pub sim_time: f64,
    /// Disable the eclipse behaviour on get requests, leaving only selfish
    /// mining.
    pub remove_eclipse: bool,
    /// Enable the honest trust-based counter measure.
    pub counter_measure: bool,
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_peers < 2 {
            return Err(SimError::Config("at least two peers are required"));
        }
        if !(0.0..=1.0).contains(&self.ratio_malicious) {
            return Err(SimError::Config("malicious ratio must lie in [0, 1]"));
        }
        if self.txn_interarrival <= 0.0 {
            return Err(SimError::Config(
                "transaction interarrival time must be positive",
            ));
        }
        if self.block_interarrival <= 0.0 {
            return Err(SimError::Config("block interarrival time must be positive"));
        }
        if self.timeout <= 0.0 {
            return Err(SimError::Config("get-request timeout must be positive"));
        }
        if self.sim_time <= 0.0 {
            return Err(SimError::Config("simulation time must be positive"));
        }
        Ok(())
    }

    pub fn num_malicious(&self) -> usize {
        (self.num_peers as f64 * self.ratio_malicious) as usize
    }

    pub fn num_honest(&self) -> usize {
        self.num_peers - self.num_malicious()
    }

    /// Folder name derived from the parameter tuple, used when none is given.
    pub fn default_folder(&self) -> String {
        format!(
            "logs_{}_{}_{}_{}_{}_{}_{}_{}",
            self.num_honest(),
            self.num_malicious(),
            (self.timeout * 1000.0) as u64,
            (self.txn_interarrival * 1000.0) as u64,
            (self.block_interarrival * 1000.0) as u64,
            self.sim_time as u64,
            self.remove_eclipse,
            self.counter_measure
        )
    }
}
