//! Immutable configuration for the model, the sampler and the summarizer.
//!
//! Every field has a default, so a TOML file only needs to name what it
//! overrides:
//!
//! ```toml
//! [priors]
//! prior_scale_mu = 0.5
//!
//! [sampler]
//! draws = 4000
//! chains = 4
//! random_seed = [11, 12, 13, 14]
//!
//! [summary]
//! hdi_prob = 0.9
//! tau_estimator = "mode"
//! ```
use crate::diagnostics::MIN_DRAWS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Scales of the Normal priors on the segment means and of the half-Normal
/// prior on the shared standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    pub prior_scale_mu: f64,
    pub prior_scale_sigma: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            prior_scale_mu: 1.0,
            prior_scale_sigma: 1.0,
        }
    }
}

impl PriorConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("prior_scale_mu", self.prior_scale_mu),
            ("prior_scale_sigma", self.prior_scale_sigma),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config(
                    field,
                    format!("must be positive and finite, got {}", value),
                ));
            }
        }
        Ok(())
    }
}

/// Seed specification: one base seed shared by all chains (each chain
/// draws from its own stream), or one explicit seed per chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RandomSeed {
    Base(u64),
    PerChain(Vec<u64>),
}

/// Settings of the Metropolis-within-Gibbs sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Retained draws per chain.
    pub draws: usize,
    /// Warm-up iterations per chain, used for adaptation and discarded.
    pub tune: usize,
    /// Number of independent chains.
    pub chains: usize,
    /// Target mean acceptance probability of the continuous block.
    pub target_accept: f64,
    /// Upper bound on leapfrog steps per Hamiltonian transition.
    pub max_leapfrog_steps: usize,
    pub random_seed: Option<RandomSeed>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            draws: 2000,
            tune: 1000,
            chains: 4,
            target_accept: 0.95,
            max_leapfrog_steps: 64,
            random_seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.draws < MIN_DRAWS {
            return Err(Error::config(
                "draws",
                format!("at least {} draws per chain are needed, got {}", MIN_DRAWS, self.draws),
            ));
        }
        if self.tune == 0 {
            return Err(Error::config("tune", "must be positive"));
        }
        if self.chains < 2 {
            return Err(Error::config(
                "chains",
                format!("at least 2 chains are needed for diagnostics, got {}", self.chains),
            ));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::config(
                "target_accept",
                format!("must lie in (0, 1), got {}", self.target_accept),
            ));
        }
        if self.max_leapfrog_steps == 0 {
            return Err(Error::config("max_leapfrog_steps", "must be positive"));
        }
        if let Some(RandomSeed::PerChain(seeds)) = &self.random_seed {
            if seeds.len() != self.chains {
                return Err(Error::config(
                    "random_seed",
                    format!("{} seeds given for {} chains", seeds.len(), self.chains),
                ));
            }
        }
        Ok(())
    }
}

/// Which pooled statistic of τ becomes the reported change point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TauEstimator {
    Mean,
    Mode,
}

impl FromStr for TauEstimator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(TauEstimator::Mean),
            "mode" => Ok(TauEstimator::Mode),
            other => Err(Error::config(
                "tau_estimator",
                format!("expected `mean` or `mode`, got `{}`", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Probability mass of the highest-density intervals.
    pub hdi_prob: f64,
    pub tau_estimator: TauEstimator,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            hdi_prob: 0.95,
            tau_estimator: TauEstimator::Mean,
        }
    }
}

impl SummaryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.hdi_prob > 0.0 && self.hdi_prob < 1.0) {
            return Err(Error::config(
                "hdi_prob",
                format!("must lie in (0, 1), got {}", self.hdi_prob),
            ));
        }
        Ok(())
    }
}

/// Complete configuration of one inference run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub priors: PriorConfig,
    pub sampler: SamplerConfig,
    pub summary: SummaryConfig,
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        self.priors.validate()?;
        self.sampler.validate()?;
        self.summary.validate()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: InferenceConfig =
            toml::from_str(text).map_err(|e| Error::config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = InferenceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampler.draws, 2000);
        assert_eq!(config.sampler.tune, 1000);
        assert_eq!(config.sampler.target_accept, 0.95);
        assert_eq!(config.priors.prior_scale_mu, 1.0);
        assert_eq!(config.priors.prior_scale_sigma, 1.0);
        assert_eq!(config.summary.hdi_prob, 0.95);
    }

    #[test]
    fn test_zero_draws_rejected() {
        let mut config = InferenceConfig::default();
        config.sampler.draws = 0;
        match config.validate() {
            Err(Error::InvalidConfiguration { field, .. }) => assert_eq!(field, "draws"),
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
    }

    #[test]
    fn test_too_few_draws_rejected() {
        let mut config = InferenceConfig::default();
        config.sampler.draws = MIN_DRAWS - 1;
        match config.validate() {
            Err(Error::InvalidConfiguration { field, .. }) => assert_eq!(field, "draws"),
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
        config.sampler.draws = MIN_DRAWS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tau_estimator_from_str() {
        assert_eq!("mean".parse::<TauEstimator>().unwrap(), TauEstimator::Mean);
        assert_eq!("Mode".parse::<TauEstimator>().unwrap(), TauEstimator::Mode);
        match "median".parse::<TauEstimator>() {
            Err(Error::InvalidConfiguration { field, .. }) => assert_eq!(field, "tau_estimator"),
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut config = InferenceConfig::default();
        config.sampler.target_accept = 1.0;
        assert!(config.validate().is_err());

        let mut config = InferenceConfig::default();
        config.sampler.chains = 1;
        assert!(config.validate().is_err());

        let mut config = InferenceConfig::default();
        config.summary.hdi_prob = 0.0;
        assert!(config.validate().is_err());

        let mut config = InferenceConfig::default();
        config.priors.prior_scale_sigma = -1.0;
        assert!(config.validate().is_err());

        let mut config = InferenceConfig::default();
        config.sampler.random_seed = Some(RandomSeed::PerChain(vec![1, 2, 3]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config = InferenceConfig::from_toml_str(
            r#"
            [sampler]
            draws = 500
            chains = 3
            random_seed = [1, 2, 3]

            [summary]
            tau_estimator = "mode"
            "#,
        )
        .unwrap();
        assert_eq!(config.sampler.draws, 500);
        assert_eq!(config.sampler.tune, 1000);
        assert_eq!(
            config.sampler.random_seed,
            Some(RandomSeed::PerChain(vec![1, 2, 3]))
        );
        assert_eq!(config.summary.tau_estimator, TauEstimator::Mode);
        assert_eq!(config.priors, PriorConfig::default());

        let config = InferenceConfig::from_toml_str("[sampler]\nrandom_seed = 42\n").unwrap();
        assert_eq!(config.sampler.random_seed, Some(RandomSeed::Base(42)));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(InferenceConfig::from_toml_str("[sampler]\ndraws = 0\n").is_err());
        assert!(InferenceConfig::from_toml_str("[sampler]\ndraws = \"many\"\n").is_err());
    }
}
