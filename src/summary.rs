//! Posterior summaries: point estimates, highest-density intervals and the
//! change-point location.
use crate::config::{SummaryConfig, TauEstimator};
use crate::diagnostics::{self, DiagnosticReport};
use crate::error::{Error, Result};
use crate::model::Parameter;
use crate::trace::TraceCollection;
use average::Variance;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Narrowest interval holding `floor(prob * N) + 1` of the sorted samples.
///
/// Returns `None` for an empty sample or a probability outside (0, 1).
pub fn hdi(samples: &[f64], prob: f64) -> Option<(f64, f64)> {
    if samples.is_empty() || !(prob > 0.0 && prob < 1.0) {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let width = ((prob * n as f64).floor() as usize + 1).min(n);
    let (start, _) = sorted
        .windows(width)
        .map(|w| w[width - 1] - w[0])
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, span)| {
            if span < best.1 {
                (i, span)
            } else {
                best
            }
        });
    Some((sorted[start], sorted[start + width - 1]))
}

/// Fraction of paired draws where `second` exceeds `first`.
pub fn prob_greater(first: &[f64], second: &[f64]) -> Option<f64> {
    let pairs = first.len().min(second.len());
    if pairs == 0 {
        return None;
    }
    let greater = first
        .iter()
        .zip(second.iter())
        .filter(|(a, b)| b > a)
        .count();
    Some(greater as f64 / pairs as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSummary {
    pub parameter: Parameter,
    pub mean: f64,
    pub sd: f64,
    pub hdi_low: f64,
    pub hdi_high: f64,
    pub r_hat: f64,
    pub ess: f64,
}

/// The estimated break: the last pre-break index and, for dated series,
/// its date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangePoint {
    pub index: usize,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosteriorSummary {
    pub parameters: Vec<ParameterSummary>,
    /// Pooled mean of τ rounded to the nearest index.
    pub tau_mean_index: usize,
    /// Most frequent τ; ties go to the lowest index.
    pub tau_mode_index: usize,
    pub change_point: ChangePoint,
    /// P(μ2 > μ1) over paired pooled draws.
    pub prob_mu_2_greater: f64,
    pub hdi_prob: f64,
    /// Whether every parameter passed the R-hat check.
    pub converged: bool,
}

impl PosteriorSummary {
    pub fn get(&self, parameter: Parameter) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|s| s.parameter == parameter)
    }
}

fn tau_mode(taus: &[usize]) -> usize {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &t in taus {
        *counts.entry(t).or_default() += 1;
    }
    // BTreeMap iterates in ascending order; keep the first maximum.
    counts
        .into_iter()
        .fold((0, 0), |best, (tau, count)| if count > best.1 { (tau, count) } else { best })
        .0
}

/// Summarizes a trace collection with a report computed from it.
///
/// `dates`, when given, maps observation indices to dates for the change
/// point.
pub fn summarize(
    traces: &TraceCollection,
    report: &DiagnosticReport,
    config: &SummaryConfig,
    dates: Option<&[NaiveDate]>,
) -> Result<PosteriorSummary> {
    if traces.is_empty() {
        return Err(Error::EmptyTrace);
    }
    if report.num_chains != traces.num_chains() || report.num_draws != traces.num_draws() {
        return Err(Error::DiagnosticsMismatch {
            report_chains: report.num_chains,
            report_draws: report.num_draws,
            trace_chains: traces.num_chains(),
            trace_draws: traces.num_draws(),
        });
    }
    config.validate()?;

    let mut parameters = Vec::with_capacity(Parameter::ALL.len());
    for &parameter in Parameter::ALL.iter() {
        let pooled = traces.pooled(parameter);
        let stats: Variance = pooled.iter().copied().collect();
        let (hdi_low, hdi_high) =
            hdi(&pooled, config.hdi_prob).ok_or(Error::EmptyTrace)?;
        let diag = report.get(parameter).ok_or_else(|| Error::DiagnosticsMismatch {
            report_chains: report.num_chains,
            report_draws: report.num_draws,
            trace_chains: traces.num_chains(),
            trace_draws: traces.num_draws(),
        })?;
        parameters.push(ParameterSummary {
            parameter,
            mean: stats.mean(),
            sd: stats.sample_variance().sqrt(),
            hdi_low,
            hdi_high,
            r_hat: diag.r_hat,
            ess: diag.ess,
        });
    }

    let n = traces.n_observations();
    let taus: Vec<usize> = traces.pooled_draws().map(|p| p.tau).collect();
    let tau_mean = taus.iter().sum::<usize>() as f64 / taus.len() as f64;
    let tau_mean_index = (tau_mean.round() as usize).min(n);
    let tau_mode_index = tau_mode(&taus);
    let index = match config.tau_estimator {
        TauEstimator::Mean => tau_mean_index,
        TauEstimator::Mode => tau_mode_index,
    };
    let change_point = ChangePoint {
        index,
        date: dates.and_then(|d| d.get(index).copied()),
    };

    let prob_mu_2_greater = prob_greater(
        &traces.pooled(Parameter::Mu1),
        &traces.pooled(Parameter::Mu2),
    )
    .ok_or(Error::EmptyTrace)?;

    debug!(
        tau_mean_index,
        tau_mode_index,
        prob_mu_2_greater,
        "posterior summarized"
    );
    Ok(PosteriorSummary {
        parameters,
        tau_mean_index,
        tau_mode_index,
        change_point,
        prob_mu_2_greater,
        hdi_prob: config.hdi_prob,
        converged: report.converged(),
    })
}

/// A trace collection together with its diagnostics, once computed.
///
/// Summaries are only available after [`diagnose`](Self::diagnose), so a
/// posterior is never reported without its convergence check.
#[derive(Debug, Clone)]
pub struct PosteriorAnalysis {
    traces: TraceCollection,
    diagnostics: Option<DiagnosticReport>,
}

impl PosteriorAnalysis {
    pub fn new(traces: TraceCollection) -> Self {
        Self {
            traces,
            diagnostics: None,
        }
    }

    pub fn traces(&self) -> &TraceCollection {
        &self.traces
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticReport> {
        self.diagnostics.as_ref()
    }

    /// Computes the diagnostic report, or returns the cached one.
    pub fn diagnose(&mut self) -> Result<&DiagnosticReport> {
        if self.diagnostics.is_none() {
            self.diagnostics = Some(diagnostics::diagnose(&self.traces)?);
        }
        self.diagnostics.as_ref().ok_or(Error::DiagnosticsNotComputed)
    }

    pub fn summarize(
        &self,
        config: &SummaryConfig,
        dates: Option<&[NaiveDate]>,
    ) -> Result<PosteriorSummary> {
        if self.traces.is_empty() {
            return Err(Error::EmptyTrace);
        }
        let report = self
            .diagnostics
            .as_ref()
            .ok_or(Error::DiagnosticsNotComputed)?;
        summarize(&self.traces, report, config, dates)
    }

    pub fn into_parts(self) -> (TraceCollection, Option<DiagnosticReport>) {
        (self.traces, self.diagnostics)
    }
}
