//! Metropolis-within-Gibbs sampler for the change-point posterior.
//!
//! Every iteration of a chain updates the two blocks in turn:
//!
//! 1. τ, with (μ1, μ2, σ) fixed: one Metropolis step with a uniform
//!    redraw over `0..=n` and one with a local jump of at most `w`
//!    positions.  Both proposals are symmetric and the τ prior is flat, so
//!    the acceptance ratio is the likelihood ratio, computed over the
//!    observations that change segment only.
//! 2. (μ1, μ2, log σ), with τ fixed: one Hamiltonian transition whose step
//!    size and diagonal metric are tuned during warm-up.  When τ leaves no
//!    observation after the break, μ2 is first redrawn from its prior, which
//!    is then its exact conditional.
//!
//! The local width `w` is tuned toward 44% acceptance during warm-up and
//! frozen afterwards.  Chains share nothing but the read-only model and run
//! in parallel on the rayon pool.
use crate::adapt::WindowedAdaptation;
use crate::config::{RandomSeed, SamplerConfig};
use crate::error::Result;
use crate::hmc::{self, HmcState};
use crate::model::{ChangePointModel, ParameterVector, CONTINUOUS_DIM};
use crate::trace::{Chain, ChainSeed, SamplerStats, TraceCollection};
use average::Variance;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::f64::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Acceptance rate the local τ jump width is tuned toward.
const TAU_TARGET_ACCEPT: f64 = 0.44;

/// Cooperative cancellation shared between a caller and running chains.
///
/// Chains poll the token once per iteration; a chain that sees it stops and
/// is reported as abandoned.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Completed chains plus the indices of chains that were abandoned.
#[derive(Debug, Clone)]
pub struct SamplingOutcome {
    pub traces: TraceCollection,
    pub abandoned: Vec<usize>,
}

/// Runs independent chains over one model with one immutable configuration.
#[derive(Debug, Clone)]
pub struct Sampler<'m, 'a> {
    model: &'m ChangePointModel<'a>,
    config: SamplerConfig,
}

impl<'m, 'a> Sampler<'m, 'a> {
    pub fn new(model: &'m ChangePointModel<'a>, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Seed and stream of every chain.  Without a configured seed, one base
    /// seed is drawn from OS entropy and logged so the run can be replayed.
    pub fn chain_seeds(&self) -> Vec<ChainSeed> {
        match &self.config.random_seed {
            Some(RandomSeed::PerChain(seeds)) => seeds
                .iter()
                .map(|&seed| ChainSeed { seed, stream: 0 })
                .collect(),
            Some(RandomSeed::Base(seed)) => self.streams(*seed),
            None => {
                let seed: u64 = rand::random();
                info!(seed, "no random_seed configured, drew one");
                self.streams(seed)
            }
        }
    }

    fn streams(&self, seed: u64) -> Vec<ChainSeed> {
        (0..self.config.chains as u64)
            .map(|stream| ChainSeed { seed, stream })
            .collect()
    }

    /// Runs every chain to completion.
    pub fn sample(&self) -> Result<TraceCollection> {
        Ok(self.sample_with_cancel(&CancellationToken::new())?.traces)
    }

    /// Runs every chain until it completes or `token` fires.  Abandoned
    /// chains are left out of the trace collection.
    pub fn sample_with_cancel(&self, token: &CancellationToken) -> Result<SamplingOutcome> {
        let seeds = self.chain_seeds();
        info!(
            chains = seeds.len(),
            draws = self.config.draws,
            tune = self.config.tune,
            n = self.model.n(),
            "sampling change-point posterior"
        );
        let start = Instant::now();

        let results: Vec<(usize, Option<Chain>)> = seeds
            .into_par_iter()
            .enumerate()
            .map(|(index, seed)| (index, self.run_chain(index, seed, token)))
            .collect();

        let mut chains = Vec::with_capacity(results.len());
        let mut abandoned = Vec::new();
        for (index, result) in results {
            match result {
                Some(chain) => chains.push(chain),
                None => abandoned.push(index),
            }
        }
        if !abandoned.is_empty() {
            warn!(?abandoned, "chains abandoned before completion");
        }
        let divergences: usize = chains.iter().map(|c| c.stats.divergences).sum();
        if divergences > 0 {
            warn!(divergences, "divergent transitions after warm-up");
        }
        info!(
            completed = chains.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sampling finished"
        );

        Ok(SamplingOutcome {
            traces: TraceCollection::new(self.model.n(), chains)?,
            abandoned,
        })
    }

    /// One full chain: warm-up followed by `draws` retained iterations.
    /// Returns `None` when cancelled.
    fn run_chain(&self, index: usize, seed: ChainSeed, token: &CancellationToken) -> Option<Chain> {
        let model = self.model;
        let n = model.n();
        let tune = self.config.tune;
        let total = tune + self.config.draws;
        let max_steps = self.config.max_leapfrog_steps;

        let mut rng = ChaCha8Rng::seed_from_u64(seed.seed);
        rng.set_stream(seed.stream);

        let (mut tau, mut q, inv_mass) = self.initial_state(&mut rng);
        let conditional = model.conditional(tau);
        let state = HmcState::new(&conditional, q);
        let step = hmc::find_reasonable_step_size(&conditional, &state, &inv_mass, 1.0, &mut rng);
        let mut adaptation =
            WindowedAdaptation::new(tune, self.config.target_accept, step, inv_mass);

        let max_width = n.max(1);
        let mut log_width = (((n + 1) as f64) / 10.0).max(1.0).ln();
        let mut width = 1usize;
        let mut step_size = step;
        let mut metric = inv_mass;

        let mut draws = Vec::with_capacity(self.config.draws);
        let mut tau_accepted = 0usize;
        let mut accept_sum = 0.0;
        let mut divergences = 0usize;

        for iter in 0..total {
            if token.is_cancelled() {
                warn!(chain = index, iteration = iter, "chain cancelled");
                return None;
            }
            let warmup = iter < tune;

            // τ block
            let sigma = q[2].exp();
            let global = rng.gen_range(0..=n);
            let global_ok = self.tau_step(&mut tau, Some(global), &q, sigma, &mut rng);

            if warmup {
                width = (log_width.exp().round() as usize).clamp(1, max_width);
            }
            let jump = rng.gen_range(1..=width) as isize;
            let target = if rng.gen::<bool>() {
                tau as isize + jump
            } else {
                tau as isize - jump
            };
            let local = if (0..=n as isize).contains(&target) {
                Some(target as usize)
            } else {
                None
            };
            let local_ok = self.tau_step(&mut tau, local, &q, sigma, &mut rng);

            if warmup {
                let rate = ((iter + 1) as f64).powf(-0.6);
                let accepted = if local_ok { 1.0 } else { 0.0 };
                log_width = (log_width + rate * (accepted - TAU_TARGET_ACCEPT))
                    .clamp(0.0, (max_width as f64).ln());
            } else {
                tau_accepted += global_ok as usize + local_ok as usize;
            }

            // continuous block
            let conditional = model.conditional(tau);
            if conditional.post_is_empty() {
                // exact Gibbs draw of μ2 from its prior
                let z: f64 = rng.sample(StandardNormal);
                q[1] = model.prior_mean() + model.priors().prior_scale_mu * z;
            }
            let current = HmcState::new(&conditional, q);
            let (eps, inv_mass) = if warmup {
                (adaptation.step_size(), *adaptation.inv_mass())
            } else {
                (step_size, metric)
            };
            let base = ((FRAC_PI_2 / eps).ceil() as usize).clamp(1, max_steps);
            let n_steps = rng.gen_range(1..=2 * base).min(max_steps);
            let t = hmc::transition(&conditional, &current, eps, n_steps, &inv_mass, &mut rng);
            q = t.state.q;

            if warmup {
                if adaptation.update(&q, t.accept_prob) {
                    let state = HmcState::new(&conditional, q);
                    let restart = hmc::find_reasonable_step_size(
                        &conditional,
                        &state,
                        adaptation.inv_mass(),
                        adaptation.step_size(),
                        &mut rng,
                    );
                    adaptation.restart_step_size(restart);
                }
                if iter + 1 == tune {
                    step_size = adaptation.adapted_step_size();
                    metric = *adaptation.inv_mass();
                    debug!(chain = index, step_size, tau_width = width, "warm-up finished");
                }
            } else {
                accept_sum += t.accept_prob;
                divergences += t.divergent as usize;
                draws.push(ParameterVector {
                    tau,
                    mu_1: q[0],
                    mu_2: q[1],
                    sigma: q[2].exp(),
                });
            }
        }

        let retained = draws.len().max(1) as f64;
        let stats = SamplerStats {
            seed,
            step_size,
            inv_mass: metric,
            tau_step_width: width,
            tau_acceptance: tau_accepted as f64 / (2.0 * retained),
            mean_accept_prob: accept_sum / retained,
            divergences,
        };
        debug!(
            chain = index,
            tau_acceptance = stats.tau_acceptance,
            mean_accept_prob = stats.mean_accept_prob,
            divergences,
            "chain finished"
        );
        Some(Chain {
            index,
            draws,
            stats,
        })
    }

    /// Dispersed starting point around the data, plus an initial metric
    /// matching the expected posterior scales of (μ1, μ2, log σ).
    fn initial_state<R: Rng>(&self, rng: &mut R) -> (usize, [f64; CONTINUOUS_DIM], [f64; CONTINUOUS_DIM]) {
        let model = self.model;
        let n = model.n();
        let stats: Variance = model.data().iter().copied().collect();
        let sd = stats.sample_variance().sqrt();
        let scale = if sd.is_finite() && sd > 0.0 {
            sd
        } else {
            0.1 * model.priors().prior_scale_sigma
        };

        let tau = rng.gen_range(0..=n);
        let z1: f64 = rng.sample(StandardNormal);
        let z2: f64 = rng.sample(StandardNormal);
        let log_sigma = scale.ln() + rng.gen_range(-0.5..0.5);
        let q = [
            model.prior_mean() + scale * z1,
            model.prior_mean() + scale * z2,
            log_sigma,
        ];

        let half = (n as f64 / 2.0).max(1.0);
        let inv_mass = [scale * scale / half, scale * scale / half, 1.0 / (2.0 * n as f64)];
        (tau, q, inv_mass)
    }

    /// Metropolis update of τ toward `proposal`; `None` is an out-of-range
    /// proposal and is rejected.
    fn tau_step<R: Rng>(
        &self,
        tau: &mut usize,
        proposal: Option<usize>,
        q: &[f64; CONTINUOUS_DIM],
        sigma: f64,
        rng: &mut R,
    ) -> bool {
        let u: f64 = rng.gen();
        let proposal = match proposal {
            Some(p) => p,
            None => return false,
        };
        if proposal == *tau {
            return true;
        }
        let delta = self
            .model
            .tau_log_likelihood_delta(*tau, proposal, q[0], q[1], sigma);
        if delta >= 0.0 || u.ln() < delta {
            *tau = proposal;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorConfig;
    use crate::model::Parameter;
    use rand_distr::{Distribution, Normal};

    fn config(seed: u64) -> SamplerConfig {
        SamplerConfig {
            draws: 300,
            tune: 200,
            chains: 2,
            random_seed: Some(RandomSeed::Base(seed)),
            ..SamplerConfig::default()
        }
    }

    /// 60 observations with a mean shift after index 29.
    fn shifted_series() -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let before = Normal::<f64>::new(0.0, 0.01).unwrap();
        let after = Normal::<f64>::new(0.03, 0.01).unwrap();
        (0..60)
            .map(|i| {
                if i < 30 {
                    before.sample(&mut rng)
                } else {
                    after.sample(&mut rng)
                }
            })
            .collect()
    }

    #[test]
    fn test_seeds_per_chain_and_streams() {
        let data = [0.1, 0.2];
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let sampler = Sampler::new(&model, config(9)).unwrap();
        assert_eq!(
            sampler.chain_seeds(),
            vec![
                ChainSeed { seed: 9, stream: 0 },
                ChainSeed { seed: 9, stream: 1 }
            ]
        );

        let per_chain = SamplerConfig {
            random_seed: Some(RandomSeed::PerChain(vec![4, 5])),
            ..config(0)
        };
        let sampler = Sampler::new(&model, per_chain).unwrap();
        assert_eq!(sampler.chain_seeds()[1], ChainSeed { seed: 5, stream: 0 });
    }

    #[test]
    fn test_invalid_config_rejected() {
        let data = [0.1, 0.2];
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let bad = SamplerConfig {
            draws: 0,
            ..config(1)
        };
        assert!(Sampler::new(&model, bad).is_err());
    }

    #[test]
    fn test_draws_respect_support() {
        let data = shifted_series();
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let traces = Sampler::new(&model, config(3)).unwrap().sample().unwrap();
        assert_eq!(traces.num_chains(), 2);
        for chain in traces.chains() {
            assert_eq!(chain.len(), 300);
            for p in &chain.draws {
                assert!(p.tau <= data.len());
                assert!(p.sigma > 0.0);
                assert!(p.mu_1.is_finite() && p.mu_2.is_finite());
            }
        }
    }

    #[test]
    fn test_same_seed_reproduces_traces() {
        let data = shifted_series();
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let a = Sampler::new(&model, config(21)).unwrap().sample().unwrap();
        let b = Sampler::new(&model, config(21)).unwrap().sample().unwrap();
        assert_eq!(a, b);
        let c = Sampler::new(&model, config(22)).unwrap().sample().unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_chains_are_independent_streams() {
        let data = shifted_series();
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let traces = Sampler::new(&model, config(5)).unwrap().sample().unwrap();
        assert_ne!(
            traces.chain(0).unwrap().values(Parameter::Mu1),
            traces.chain(1).unwrap().values(Parameter::Mu1)
        );
    }

    #[test]
    fn test_recovers_shift() {
        let data = shifted_series();
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let traces = Sampler::new(&model, config(8)).unwrap().sample().unwrap();
        let tau = crate::utils::mean(&traces.pooled(Parameter::Tau)).unwrap();
        let mu_1 = crate::utils::mean(&traces.pooled(Parameter::Mu1)).unwrap();
        let mu_2 = crate::utils::mean(&traces.pooled(Parameter::Mu2)).unwrap();
        let sigma = crate::utils::mean(&traces.pooled(Parameter::Sigma)).unwrap();
        assert!((tau - 29.0).abs() < 3.0, "tau = {}", tau);
        assert_abs_diff_eq!(mu_1, 0.0, epsilon = 0.01);
        assert_abs_diff_eq!(mu_2, 0.03, epsilon = 0.01);
        assert!(sigma > 0.005 && sigma < 0.02, "sigma = {}", sigma);
    }

    #[test]
    fn test_cancelled_chains_are_abandoned() {
        let data = shifted_series();
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = Sampler::new(&model, config(1))
            .unwrap()
            .sample_with_cancel(&token)
            .unwrap();
        assert_eq!(outcome.abandoned, vec![0, 1]);
        assert!(outcome.traces.is_empty());
        assert_eq!(outcome.traces.num_chains(), 0);
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let token = CancellationToken::with_deadline(Instant::now());
        assert!(token.is_cancelled());
        assert!(!CancellationToken::with_timeout(Duration::from_secs(3600)).is_cancelled());
    }

    #[test]
    fn test_single_observation() {
        let data = [0.02];
        let model = ChangePointModel::new(&data, PriorConfig::default()).unwrap();
        let traces = Sampler::new(&model, config(2)).unwrap().sample().unwrap();
        for p in traces.pooled_draws() {
            assert!(p.tau <= 1);
            assert!(p.sigma > 0.0);
        }
    }

    #[test]
    fn test_mu_2_follows_prior_when_post_segment_empty() {
        // with one observation every τ leaves the post segment empty
        let data = [0.02];
        let priors = PriorConfig {
            prior_scale_mu: 0.5,
            ..PriorConfig::default()
        };
        let model = ChangePointModel::new(&data, priors).unwrap();
        let traces = Sampler::new(&model, config(4)).unwrap().sample().unwrap();
        let mu_2 = traces.pooled(Parameter::Mu2);
        let mean = crate::utils::mean(&mu_2).unwrap();
        let sd = crate::utils::sample_variance(&mu_2).unwrap().sqrt();
        assert_abs_diff_eq!(mean, model.prior_mean(), epsilon = 0.15);
        assert!(sd > 0.4 && sd < 0.6, "sd = {}", sd);

        let lag_one: f64 = mu_2
            .windows(2)
            .map(|w| (w[0] - mean) * (w[1] - mean))
            .sum::<f64>()
            / ((mu_2.len() - 1) as f64 * sd * sd);
        assert!(lag_one.abs() < 0.3, "lag-one autocorrelation = {}", lag_one);
    }
}
