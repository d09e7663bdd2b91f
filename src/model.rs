//! The single change-point model.
//!
//! ```text
//! tau   ~ DiscreteUniform(0, n)
//! mu_1  ~ Normal(mean(x), prior_scale_mu)
//! mu_2  ~ Normal(mean(x), prior_scale_mu)
//! sigma ~ HalfNormal(prior_scale_sigma)
//! x_i   ~ Normal(mu_1 if i <= tau else mu_2, sigma)
//! ```
//!
//! Observation `i == tau` belongs to the pre-break segment, so `tau` takes
//! `n + 1` values and `tau = n - 1` and `tau = n` share one likelihood.
use crate::config::PriorConfig;
use crate::error::Result;
use crate::series::validate_values;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::fmt;

/// 0.5 * ln(2 * pi)
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// One point of the joint parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub tau: usize,
    pub mu_1: f64,
    pub mu_2: f64,
    pub sigma: f64,
}

/// Names a coordinate of [`ParameterVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Tau,
    Mu1,
    Mu2,
    Sigma,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Tau,
        Parameter::Mu1,
        Parameter::Mu2,
        Parameter::Sigma,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Tau => "tau",
            Parameter::Mu1 => "mu_1",
            Parameter::Mu2 => "mu_2",
            Parameter::Sigma => "sigma",
        }
    }

    /// Reads this coordinate, with τ widened to `f64`.
    pub fn value(&self, p: &ParameterVector) -> f64 {
        match self {
            Parameter::Tau => p.tau as f64,
            Parameter::Mu1 => p.mu_1,
            Parameter::Mu2 => p.mu_2,
            Parameter::Sigma => p.sigma,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mean of observation `index` under change point `tau`.
#[inline]
pub fn switch_mean(index: usize, tau: usize, mu_1: f64, mu_2: f64) -> f64 {
    if index <= tau {
        mu_1
    } else {
        mu_2
    }
}

#[inline]
fn normal_log_density(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -LN_SQRT_2PI - sd.ln() - 0.5 * z * z
}

#[inline]
fn half_normal_log_density(x: f64, scale: f64) -> f64 {
    if !(x > 0.0) || !x.is_finite() {
        return f64::NEG_INFINITY;
    }
    LN_2 + normal_log_density(x, 0.0, scale)
}

/// Count, mean and centered sum of squares of a run of observations.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentStats {
    pub count: f64,
    pub mean: f64,
    pub centered_ss: f64,
}

impl SegmentStats {
    pub fn from_slice(xs: &[f64]) -> Self {
        if xs.is_empty() {
            return Self::default();
        }
        let count = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / count;
        let centered_ss = xs.iter().map(|x| (x - mean).powi(2)).sum();
        Self {
            count,
            mean,
            centered_ss,
        }
    }

    /// Sum of (x - mu) over the segment.
    #[inline]
    pub fn residual_sum(&self, mu: f64) -> f64 {
        self.count * (self.mean - mu)
    }

    /// Sum of (x - mu)^2 over the segment.
    #[inline]
    pub fn squared_error(&self, mu: f64) -> f64 {
        let d = self.mean - mu;
        self.centered_ss + self.count * d * d
    }
}

/// Unnormalized posterior of (τ, μ1, μ2, σ) given a borrowed series.
#[derive(Debug, Clone, Copy)]
pub struct ChangePointModel<'a> {
    data: &'a [f64],
    priors: PriorConfig,
    prior_mean: f64,
}

impl<'a> ChangePointModel<'a> {
    pub fn new(data: &'a [f64], priors: PriorConfig) -> Result<Self> {
        validate_values(data)?;
        priors.validate()?;
        let prior_mean = data.iter().sum::<f64>() / data.len() as f64;
        Ok(Self {
            data,
            priors,
            prior_mean,
        })
    }

    pub fn data(&self) -> &'a [f64] {
        self.data
    }

    /// Number of observations.
    pub fn n(&self) -> usize {
        self.data.len()
    }

    /// Centre of the Normal priors on μ1 and μ2.
    pub fn prior_mean(&self) -> f64 {
        self.prior_mean
    }

    pub fn priors(&self) -> &PriorConfig {
        &self.priors
    }

    pub fn log_prior(&self, p: &ParameterVector) -> f64 {
        if p.tau > self.n() || !p.mu_1.is_finite() || !p.mu_2.is_finite() {
            return f64::NEG_INFINITY;
        }
        let log_sigma = half_normal_log_density(p.sigma, self.priors.prior_scale_sigma);
        if log_sigma == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        -((self.n() + 1) as f64).ln()
            + normal_log_density(p.mu_1, self.prior_mean, self.priors.prior_scale_mu)
            + normal_log_density(p.mu_2, self.prior_mean, self.priors.prior_scale_mu)
            + log_sigma
    }

    /// Sum of per-observation Normal log densities under the switch mean.
    pub fn log_likelihood(&self, p: &ParameterVector) -> f64 {
        if !(p.sigma > 0.0) || !p.sigma.is_finite() {
            return f64::NEG_INFINITY;
        }
        self.data
            .iter()
            .enumerate()
            .map(|(i, &x)| normal_log_density(x, switch_mean(i, p.tau, p.mu_1, p.mu_2), p.sigma))
            .sum()
    }

    pub fn log_posterior(&self, p: &ParameterVector) -> f64 {
        let prior = self.log_prior(p);
        if prior == f64::NEG_INFINITY {
            return prior;
        }
        let value = prior + self.log_likelihood(p);
        if value.is_nan() {
            f64::NEG_INFINITY
        } else {
            value
        }
    }

    /// Change in log-likelihood when the change point moves from `from` to
    /// `to` with the other parameters fixed.  Only the observations that
    /// switch segment are visited.
    pub fn tau_log_likelihood_delta(
        &self,
        from: usize,
        to: usize,
        mu_1: f64,
        mu_2: f64,
        sigma: f64,
    ) -> f64 {
        if from == to {
            return 0.0;
        }
        let (lo, hi) = if from < to { (from, to) } else { (to, from) };
        let start = (lo + 1).min(self.n());
        let end = (hi + 1).min(self.n());
        // Observations in (lo, hi] are pre-break under `hi`, post-break under `lo`.
        let gain: f64 = self.data[start..end]
            .iter()
            .map(|&x| (x - mu_2).powi(2) - (x - mu_1).powi(2))
            .sum::<f64>()
            / (2.0 * sigma * sigma);
        if to > from {
            gain
        } else {
            -gain
        }
    }

    /// Sufficient statistics of the pre-break and post-break segments.
    pub fn segments(&self, tau: usize) -> (SegmentStats, SegmentStats) {
        let split = (tau + 1).min(self.n());
        (
            SegmentStats::from_slice(&self.data[..split]),
            SegmentStats::from_slice(&self.data[split..]),
        )
    }

    /// The continuous block of the posterior with τ held fixed.
    pub fn conditional(&self, tau: usize) -> ContinuousConditional<'_, 'a> {
        let (pre, post) = self.segments(tau);
        ContinuousConditional {
            model: self,
            tau,
            pre,
            post,
        }
    }
}

/// Number of unconstrained continuous coordinates: (μ1, μ2, log σ).
pub const CONTINUOUS_DIM: usize = 3;

/// Log density over `q = (μ1, μ2, η)` with `σ = exp(η)` for one fixed τ.
///
/// Includes the log-Jacobian `η`, so it equals
/// `log_posterior(τ, μ1, μ2, exp(η)) + η`.  Evaluation is O(1) through the
/// segment statistics.
#[derive(Debug, Clone, Copy)]
pub struct ContinuousConditional<'m, 'a> {
    model: &'m ChangePointModel<'a>,
    tau: usize,
    pre: SegmentStats,
    post: SegmentStats,
}

impl<'m, 'a> ContinuousConditional<'m, 'a> {
    pub fn tau(&self) -> usize {
        self.tau
    }

    /// True when no observation falls after τ, leaving μ2 at its prior.
    pub fn post_is_empty(&self) -> bool {
        self.post.count == 0.0
    }

    /// Log density and its gradient; `(-inf, 0)` where the density is not
    /// finite.
    pub fn log_density_and_gradient(
        &self,
        q: &[f64; CONTINUOUS_DIM],
    ) -> (f64, [f64; CONTINUOUS_DIM]) {
        let invalid = (f64::NEG_INFINITY, [0.0; CONTINUOUS_DIM]);
        let [mu_1, mu_2, eta] = *q;
        let sigma = eta.exp();
        let inv_var = (-2.0 * eta).exp();
        if !(sigma > 0.0 && sigma.is_finite() && inv_var.is_finite()) {
            return invalid;
        }

        let priors = &self.model.priors;
        let n = self.model.n() as f64;
        let m0 = self.model.prior_mean;
        let var_mu = priors.prior_scale_mu * priors.prior_scale_mu;
        let var_sigma = priors.prior_scale_sigma * priors.prior_scale_sigma;
        let ss = self.pre.squared_error(mu_1) + self.post.squared_error(mu_2);

        let log_likelihood = -n * eta - n * LN_SQRT_2PI - 0.5 * ss * inv_var;
        let log_prior = -((self.model.n() + 1) as f64).ln()
            + normal_log_density(mu_1, m0, priors.prior_scale_mu)
            + normal_log_density(mu_2, m0, priors.prior_scale_mu)
            + half_normal_log_density(sigma, priors.prior_scale_sigma);
        let value = log_likelihood + log_prior + eta;

        let gradient = [
            self.pre.residual_sum(mu_1) * inv_var - (mu_1 - m0) / var_mu,
            self.post.residual_sum(mu_2) * inv_var - (mu_2 - m0) / var_mu,
            -n + ss * inv_var - sigma * sigma / var_sigma + 1.0,
        ];
        if !value.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return invalid;
        }
        (value, gradient)
    }
}
