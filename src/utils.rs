use crate::{Array1, Array2};
use anyhow::{anyhow, Error, Result};
use average::Variance;

/// Compute the arithmetic mean of an array.
pub fn mean(arr: &[f64]) -> Result<f64, Error> {
    if arr.is_empty() {
        return Err(anyhow!("Can't take mean of empty array"));
    }
    let acc: Variance = arr.iter().copied().collect();
    Ok(acc.mean())
}

/// Compute the sample variance of an array using Bessel's correction.
/// A single value has zero variance.
pub fn sample_variance(arr: &[f64]) -> Result<f64, Error> {
    if arr.is_empty() {
        return Err(anyhow!("Can't take variance of empty array"));
    }
    let acc: Variance = arr.iter().copied().collect();
    Ok(acc.sample_variance())
}

/// Length of the shortest chain, or an error when there are no chains.
pub fn min_chain_length(chains: &[Array1]) -> Result<usize, Error> {
    chains
        .iter()
        .map(|c| c.len())
        .min()
        .ok_or_else(|| anyhow!("No chains given"))
}

/// Trims every chain from the back to the length of the shortest one.
pub fn trim_chains(chains: &[Array1]) -> Result<Array2, Error> {
    let num_draws = min_chain_length(chains)?;
    Ok(chains.iter().map(|c| c[..num_draws].to_vec()).collect())
}

/// Splits each chain into two chains of equal length.  When the
/// number of total draws N is odd, the (N+1)/2th draw is ignored.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation).
///
/// Chains are trimmed to the shortest chain first.
pub fn split_chains(chains: &[Array1]) -> Result<Array2, Error> {
    if chains.is_empty() {
        return Err(anyhow!("Can't split empty array of chains"));
    }
    let num_draws = min_chain_length(chains)?;
    if num_draws < 1 {
        return Err(anyhow!("No samples to split"));
    }
    let half = num_draws / 2;
    let offset = num_draws % 2;
    let mut split_draws = Vec::with_capacity(2 * chains.len());
    for chain in chains {
        split_draws.push(chain[..half].to_vec());
        split_draws.push(chain[(half + offset)..num_draws].to_vec());
    }
    Ok(split_draws)
}

/// Concatenates all chains into one array, chain by chain.
pub fn flatten(chains: &[Array1]) -> Array1 {
    chains.iter().flatten().copied().collect()
}

/// True when every draw of every chain equals the first one (within 1e-10).
pub fn all_constant(chains: &[Array1]) -> bool {
    let mut values = chains.iter().flatten();
    match values.next() {
        Some(first) => values.all(|v| (v - first).abs() < 1e-10),
        None => true,
    }
}
