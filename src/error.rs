use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing, sampling or summarizing a change-point model.
///
/// Rejected sampler proposals are not errors: they are absorbed by the
/// Markov chain. Non-convergence is reported by the diagnostic report and
/// only becomes an error when the caller asks for it via
/// [`DiagnosticReport::check`](crate::diagnostics::DiagnosticReport::check).
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration for {field}: {message}")]
    InvalidConfiguration { field: String, message: String },

    #[error("chains have not converged (r_hat above threshold for {})", parameters.join(", "))]
    NonConvergence { parameters: Vec<String> },

    #[error("trace collection has no retained draws")]
    EmptyTrace,

    #[error("convergence diagnostics must be computed before summarizing")]
    DiagnosticsNotComputed,

    #[error("diagnostic report covers {report_chains} chains x {report_draws} draws, trace has {trace_chains} x {trace_draws}")]
    DiagnosticsMismatch {
        report_chains: usize,
        report_draws: usize,
        trace_chains: usize,
        trace_draws: usize,
    },

    #[error("diagnostics failed: {0}")]
    Diagnostics(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(field: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
