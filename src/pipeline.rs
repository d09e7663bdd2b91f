//! End-to-end inference: validate, sample, diagnose, summarize.
use crate::config::InferenceConfig;
use crate::diagnostics::DiagnosticReport;
use crate::error::{Error, Result};
use crate::model::ChangePointModel;
use crate::sampler::{CancellationToken, Sampler};
use crate::series::ObservationSeries;
use crate::summary::{PosteriorAnalysis, PosteriorSummary};
use crate::trace::TraceCollection;
use serde::Serialize;
use tracing::{info, warn};

/// Everything one inference run produces.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePointAnalysis {
    pub traces: TraceCollection,
    pub diagnostics: DiagnosticReport,
    pub summary: PosteriorSummary,
    /// Chains abandoned on cancellation and left out of the traces.
    pub abandoned_chains: Vec<usize>,
}

/// Runs the full analysis with no deadline.
pub fn analyze(series: &ObservationSeries, config: &InferenceConfig) -> Result<ChangePointAnalysis> {
    analyze_with_cancel(series, config, &CancellationToken::new())
}

/// Runs the full analysis, abandoning chains still running when `token`
/// fires.  Fails with [`Error::EmptyTrace`] when no chain completed.
///
/// Non-convergence does not fail the run; inspect
/// [`DiagnosticReport::converged`] or call [`DiagnosticReport::check`].
pub fn analyze_with_cancel(
    series: &ObservationSeries,
    config: &InferenceConfig,
    token: &CancellationToken,
) -> Result<ChangePointAnalysis> {
    config.validate()?;
    let model = ChangePointModel::new(series.values(), config.priors)?;
    let sampler = Sampler::new(&model, config.sampler.clone())?;
    let outcome = sampler.sample_with_cancel(token)?;
    if outcome.traces.is_empty() {
        return Err(Error::EmptyTrace);
    }

    let mut analysis = PosteriorAnalysis::new(outcome.traces);
    let diagnostics = analysis.diagnose()?.clone();
    let summary = analysis.summarize(&config.summary, series.dates())?;
    if !diagnostics.converged() {
        warn!(
            parameters = ?diagnostics.non_converged(),
            "posterior summary computed from non-converged chains"
        );
    }
    info!(
        change_point = summary.change_point.index,
        prob_mu_2_greater = summary.prob_mu_2_greater,
        "analysis finished"
    );
    let (traces, _) = analysis.into_parts();
    Ok(ChangePointAnalysis {
        traces,
        diagnostics,
        summary,
        abandoned_chains: outcome.abandoned,
    })
}
