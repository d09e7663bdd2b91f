use crate::utils::{mean, min_chain_length, sample_variance, split_chains, trim_chains};
use crate::{Array1, Array2};
use anyhow::{anyhow, Error, Result};

/// Computes the potential scale reduction (Rhat) for one parameter
/// across all kept samples.  Chains are trimmed from the back to match
/// the length of the shortest chain.
///
/// Zero within-chain variance is handled explicitly: identical constant
/// chains give exactly 1.0, constant chains stuck at different values give
/// infinity.
///
/// See more details in Stan reference manual section
/// ["Potential Scale Reduction"](https://mc-stan.org/docs/2_24/reference-manual/notation-for-samples-chains-and-draws.html#potential-scale-reduction).
pub fn potential_scale_reduction_factor(chains: &[Array1]) -> Result<f64, Error> {
    let num_draws = min_chain_length(chains)?;
    if num_draws < 2 {
        return Err(anyhow!("Must have at least 2 draws per chain to compute Rhat"));
    }
    let chains = trim_chains(chains)?;

    let mut chain_means: Array1 = Vec::with_capacity(chains.len());
    let mut chain_vars: Array1 = Vec::with_capacity(chains.len());
    for chain in chains.iter() {
        chain_means.push(mean(chain)?);
        chain_vars.push(sample_variance(chain)?);
    }

    let n = num_draws as f64;
    let var_between = if chains.len() > 1 {
        n * sample_variance(&chain_means)?
    } else {
        0.0
    };
    let var_within = mean(&chain_vars)?;
    if var_within <= 0.0 {
        return Ok(if var_between <= 0.0 { 1.0 } else { f64::INFINITY });
    }
    Ok(((var_between / var_within + n - 1.0) / n).sqrt())
}

/// Computes the split potential scale reduction (Rhat) for one parameter.
/// Each chain is halved before the ordinary statistic is computed, so a
/// chain whose first half disagrees with its second half is flagged even
/// when only one chain is available.  When the number of draws N is odd,
/// the (N+1)/2th draw is ignored.
///
/// Based on reference implementation in Stan v2.24.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_potential_scale_reduction.hpp]()
pub fn split_potential_scale_reduction_factor(chains: &[Array1]) -> Result<f64, Error> {
    let split: Array2 = split_chains(chains)?;
    potential_scale_reduction_factor(&split)
}
