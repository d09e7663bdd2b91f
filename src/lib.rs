//! Bayesian estimation of a single change point in a series of log-returns.
//!
//! The model splits the series at an unknown index τ into two segments with
//! their own means μ1 and μ2 and a shared noise level σ.  The posterior is
//! explored with a Metropolis-within-Gibbs sampler running several
//! independent chains in parallel, checked with Gelman Rubin potential
//! scale reduction factor (R hat) and effective sample size, and reduced to
//! point estimates, highest-density intervals and P(μ2 > μ1).
//!
//! ```no_run
//! use bayes_changepoint::{analyze, InferenceConfig, ObservationSeries};
//!
//! let series = ObservationSeries::new(vec![0.01, 0.01, 0.01, 0.05, 0.05, 0.05])?;
//! let analysis = analyze(&series, &InferenceConfig::default())?;
//! analysis.diagnostics.check()?;
//! println!("break after index {}", analysis.summary.change_point.index);
//! # Ok::<(), bayes_changepoint::Error>(())
//! ```
#[cfg(test)]
#[macro_use]
extern crate approx;

mod adapt;
/// Immutable configuration of priors, sampler and summaries
pub mod config;
/// Convergence report over all parameters
pub mod diagnostics;
pub mod error;
/// Effective Sample Size (ESS)
pub mod ess;
mod hmc;
/// The change-point model and its log densities
pub mod model;
/// Validate, sample, diagnose and summarize in one call
pub mod pipeline;
/// Gelman-Rubin split potential scale reducation (Rhat)
pub mod rhat;
/// Metropolis-within-Gibbs sampler and cancellation
pub mod sampler;
/// Observation series and price history input
pub mod series;
/// Point estimates, intervals and the change-point location
pub mod summary;
/// Retained draws of every chain
pub mod trace;
/// Convenience utilities like chain splitting and summary statistics
/// shared by the diagnostics
pub mod utils;

pub use config::{InferenceConfig, PriorConfig, RandomSeed, SamplerConfig, SummaryConfig, TauEstimator};
pub use diagnostics::{diagnose, DiagnosticReport, ParameterDiagnostics, RHAT_THRESHOLD};
pub use error::{Error, Result};
pub use model::{switch_mean, ChangePointModel, Parameter, ParameterVector};
pub use pipeline::{analyze, analyze_with_cancel, ChangePointAnalysis};
pub use sampler::{CancellationToken, Sampler, SamplingOutcome};
pub use series::{read_price_csv, ObservationSeries, PriceRecord};
pub use summary::{summarize, ChangePoint, PosteriorAnalysis, PosteriorSummary};
pub use trace::{Chain, TraceCollection};

/// One-dimensional vector of numeric values
pub type Array1 = Vec<f64>;
/// Two dimensional vector of vectors of numeric values
pub type Array2 = Vec<Array1>;
