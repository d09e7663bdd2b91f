//! Retained draws of every chain.
use crate::error::{Error, Result};
use crate::model::{Parameter, ParameterVector, CONTINUOUS_DIM};
use crate::{Array1, Array2};
use serde::Serialize;
use std::collections::BTreeMap;

/// How a chain's random stream was seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainSeed {
    pub seed: u64,
    pub stream: u64,
}

/// Sampler state at the end of a chain, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerStats {
    pub seed: ChainSeed,
    /// Leapfrog step size after warm-up.
    pub step_size: f64,
    /// Diagonal inverse metric over (μ1, μ2, log σ) after warm-up.
    pub inv_mass: [f64; CONTINUOUS_DIM],
    /// Largest local τ jump after warm-up.
    pub tau_step_width: usize,
    /// Fraction of accepted τ proposals among retained iterations.
    pub tau_acceptance: f64,
    /// Mean acceptance probability of the Hamiltonian block.
    pub mean_accept_prob: f64,
    /// Divergent Hamiltonian transitions among retained iterations.
    pub divergences: usize,
}

/// The retained draws of one chain, warm-up excluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chain {
    pub index: usize,
    pub draws: Vec<ParameterVector>,
    pub stats: SamplerStats,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    /// The trace of one parameter.
    pub fn values(&self, parameter: Parameter) -> Array1 {
        self.draws.iter().map(|p| parameter.value(p)).collect()
    }
}

/// All completed chains of a run, keyed by chain index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceCollection {
    n_observations: usize,
    chains: BTreeMap<usize, Chain>,
}

impl TraceCollection {
    /// Builds a collection; every τ must lie in `[0, n_observations]`.
    pub fn new(n_observations: usize, chains: Vec<Chain>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for chain in chains {
            if let Some(p) = chain.draws.iter().find(|p| p.tau > n_observations) {
                return Err(Error::InvalidInput(format!(
                    "chain {} has tau {} outside [0, {}]",
                    chain.index, p.tau, n_observations
                )));
            }
            if map.insert(chain.index, chain).is_some() {
                return Err(Error::InvalidInput("duplicate chain index".to_string()));
            }
        }
        Ok(Self {
            n_observations,
            chains: map,
        })
    }

    pub fn n_observations(&self) -> usize {
        self.n_observations
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    /// Draws per chain, taken as the shortest chain.
    pub fn num_draws(&self) -> usize {
        self.chains.values().map(Chain::len).min().unwrap_or(0)
    }

    /// True when no chain holds a retained draw.
    pub fn is_empty(&self) -> bool {
        self.num_draws() == 0
    }

    pub fn chain(&self, index: usize) -> Option<&Chain> {
        self.chains.get(&index)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    /// One row per chain, trimmed to the shortest chain.
    pub fn parameter_chains(&self, parameter: Parameter) -> Array2 {
        let num_draws = self.num_draws();
        self.chains
            .values()
            .map(|c| {
                c.draws[..num_draws]
                    .iter()
                    .map(|p| parameter.value(p))
                    .collect()
            })
            .collect()
    }

    /// Draws of every chain in chain order, trimmed to the shortest chain.
    pub fn pooled_draws(&self) -> impl Iterator<Item = &ParameterVector> {
        let num_draws = self.num_draws();
        self.chains
            .values()
            .flat_map(move |c| c.draws[..num_draws].iter())
    }

    pub fn pooled(&self, parameter: Parameter) -> Array1 {
        self.pooled_draws().map(|p| parameter.value(p)).collect()
    }

    pub fn total_divergences(&self) -> usize {
        self.chains.values().map(|c| c.stats.divergences).sum()
    }
}
