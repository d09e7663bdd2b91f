//! Convergence diagnostics over a trace collection.
use crate::error::{Error, Result};
use crate::ess::{compute_estimated_mcse, compute_split_effective_sample_size};
use crate::model::Parameter;
use crate::rhat::split_potential_scale_reduction_factor;
use crate::trace::TraceCollection;
use crate::utils::{all_constant, flatten, sample_variance};
use crate::Array1;
use serde::Serialize;
use tracing::{debug, warn};

/// Split R-hat above this value marks a parameter as not converged.
pub const RHAT_THRESHOLD: f64 = 1.01;

/// Fewest retained draws per chain: the split estimators need four per half.
pub(crate) const MIN_DRAWS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterDiagnostics {
    pub parameter: Parameter,
    pub r_hat: f64,
    pub ess: f64,
    pub mcse: f64,
}

impl ParameterDiagnostics {
    pub fn converged(&self) -> bool {
        self.r_hat <= RHAT_THRESHOLD
    }
}

/// Diagnostics of every parameter, with the trace shape they were computed
/// from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub num_chains: usize,
    pub num_draws: usize,
    pub parameters: Vec<ParameterDiagnostics>,
    /// Divergent transitions among retained draws, summed over chains.
    pub divergences: usize,
}

impl DiagnosticReport {
    pub fn converged(&self) -> bool {
        self.parameters.iter().all(ParameterDiagnostics::converged)
    }

    pub fn non_converged(&self) -> Vec<Parameter> {
        self.parameters
            .iter()
            .filter(|d| !d.converged())
            .map(|d| d.parameter)
            .collect()
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ParameterDiagnostics> {
        self.parameters.iter().find(|d| d.parameter == parameter)
    }

    /// Turns a non-converged report into [`Error::NonConvergence`].
    pub fn check(&self) -> Result<()> {
        let failed = self.non_converged();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::NonConvergence {
                parameters: failed.iter().map(|p| p.name().to_string()).collect(),
            })
        }
    }
}

/// Split R-hat, split ESS and MCSE of one parameter.
///
/// A parameter that never moves in any chain has R-hat 1, ESS equal to the
/// number of draws and zero MCSE.  Chains that are each constant but stuck
/// at different values have infinite R-hat and count as one draw per chain.
fn diagnose_parameter(parameter: Parameter, chains: &[Array1]) -> Result<ParameterDiagnostics> {
    let total = (chains.len() * chains[0].len()) as f64;
    if all_constant(chains) {
        return Ok(ParameterDiagnostics {
            parameter,
            r_hat: 1.0,
            ess: total,
            mcse: 0.0,
        });
    }
    if chains.iter().all(|c| all_constant(std::slice::from_ref(c))) {
        let ess = chains.len() as f64;
        let sd = sample_variance(&flatten(chains))?.sqrt();
        return Ok(ParameterDiagnostics {
            parameter,
            r_hat: f64::INFINITY,
            ess,
            mcse: sd / ess.sqrt(),
        });
    }
    Ok(ParameterDiagnostics {
        parameter,
        r_hat: split_potential_scale_reduction_factor(chains)?,
        ess: compute_split_effective_sample_size(chains)?,
        mcse: compute_estimated_mcse(chains)?,
    })
}

/// Computes the diagnostic report of every parameter.  Pure: the same
/// traces always give the same report.
pub fn diagnose(traces: &TraceCollection) -> Result<DiagnosticReport> {
    if traces.is_empty() {
        return Err(Error::EmptyTrace);
    }
    let num_draws = traces.num_draws();
    if num_draws < MIN_DRAWS {
        return Err(Error::InvalidInput(format!(
            "diagnostics need at least {} draws per chain, got {}",
            MIN_DRAWS, num_draws
        )));
    }

    let parameters = Parameter::ALL
        .iter()
        .map(|&p| diagnose_parameter(p, &traces.parameter_chains(p)))
        .collect::<Result<Vec<_>>>()?;

    let report = DiagnosticReport {
        num_chains: traces.num_chains(),
        num_draws,
        parameters,
        divergences: traces.total_divergences(),
    };
    for d in &report.parameters {
        debug!(parameter = %d.parameter, r_hat = d.r_hat, ess = d.ess, mcse = d.mcse, "diagnostics");
        if !d.converged() {
            warn!(
                parameter = %d.parameter,
                r_hat = d.r_hat,
                threshold = RHAT_THRESHOLD,
                "r_hat above threshold"
            );
        }
    }
    Ok(report)
}
