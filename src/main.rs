use anyhow::{Context, Result};
use bayes_changepoint::{
    analyze_with_cancel, read_price_csv, CancellationToken, ChangePointAnalysis, InferenceConfig,
    ObservationSeries, Parameter, RandomSeed, TauEstimator,
};
use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Estimate a single change point in the log-returns of a price history
#[derive(Parser, Debug)]
#[command(name = "bayes-changepoint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV file with a `Date,Price` header
    prices: PathBuf,

    /// TOML configuration file; flags below override it
    #[arg(long, short = 'c', env = "BAYES_CHANGEPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Retained draws per chain
    #[arg(long)]
    draws: Option<usize>,

    /// Warm-up iterations per chain
    #[arg(long)]
    tune: Option<usize>,

    #[arg(long)]
    chains: Option<usize>,

    /// Target acceptance probability of the continuous block
    #[arg(long)]
    target_accept: Option<f64>,

    #[arg(long)]
    max_leapfrog_steps: Option<usize>,

    /// Base seed; chain k draws from stream k
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    prior_scale_mu: Option<f64>,

    #[arg(long)]
    prior_scale_sigma: Option<f64>,

    /// Probability mass of the reported intervals
    #[arg(long)]
    hdi_prob: Option<f64>,

    /// Statistic of tau reported as the change point: mean or mode
    #[arg(long)]
    tau_estimator: Option<TauEstimator>,

    /// Abandon chains still running after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "text")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    fn inference_config(&self) -> Result<InferenceConfig> {
        let mut config = match &self.config {
            Some(path) => InferenceConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => InferenceConfig::default(),
        };
        let sampler = &mut config.sampler;
        if let Some(v) = self.draws {
            sampler.draws = v;
        }
        if let Some(v) = self.tune {
            sampler.tune = v;
        }
        if let Some(v) = self.chains {
            sampler.chains = v;
        }
        if let Some(v) = self.target_accept {
            sampler.target_accept = v;
        }
        if let Some(v) = self.max_leapfrog_steps {
            sampler.max_leapfrog_steps = v;
        }
        if let Some(v) = self.seed {
            sampler.random_seed = Some(RandomSeed::Base(v));
        }
        if let Some(v) = self.prior_scale_mu {
            config.priors.prior_scale_mu = v;
        }
        if let Some(v) = self.prior_scale_sigma {
            config.priors.prior_scale_sigma = v;
        }
        if let Some(v) = self.hdi_prob {
            config.summary.hdi_prob = v;
        }
        if let Some(v) = self.tau_estimator {
            config.summary.tau_estimator = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bayes_changepoint={}", level)));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn print_text(analysis: &ChangePointAnalysis) {
    let summary = &analysis.summary;
    println!(
        "{:<8} {:>12} {:>12} {:>12} {:>12} {:>8} {:>8}",
        "param", "mean", "sd", "hdi_low", "hdi_high", "r_hat", "ess"
    );
    for p in &summary.parameters {
        println!(
            "{:<8} {:>12.6} {:>12.6} {:>12.6} {:>12.6} {:>8.3} {:>8.0}",
            p.parameter.name(),
            p.mean,
            p.sd,
            p.hdi_low,
            p.hdi_high,
            p.r_hat,
            p.ess
        );
    }
    println!();
    println!(
        "tau: mean index {}, mode index {}",
        summary.tau_mean_index, summary.tau_mode_index
    );
    match summary.change_point.date {
        Some(date) => println!(
            "change point: index {} ({})",
            summary.change_point.index, date
        ),
        None => println!("change point: index {}", summary.change_point.index),
    }
    println!("P(mu_2 > mu_1) = {:.4}", summary.prob_mu_2_greater);
    if let Some(mu_1) = summary.get(Parameter::Mu1) {
        if let Some(mu_2) = summary.get(Parameter::Mu2) {
            println!("mean shift: {:+.6}", mu_2.mean - mu_1.mean);
        }
    }
    if analysis.diagnostics.divergences > 0 {
        println!("divergent transitions: {}", analysis.diagnostics.divergences);
    }
    if !analysis.abandoned_chains.is_empty() {
        println!("abandoned chains: {:?}", analysis.abandoned_chains);
    }
    if !summary.converged {
        println!("WARNING: chains have not converged, do not trust this summary");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.inference_config()?;
    let records = read_price_csv(&cli.prices)
        .with_context(|| format!("reading {}", cli.prices.display()))?;
    let series = ObservationSeries::from_prices(records)?;
    info!(observations = series.len(), "loaded log-returns");

    let token = match cli.timeout_secs {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };
    let analysis = analyze_with_cancel(&series, &config, &token)?;
    if let Err(e) = analysis.diagnostics.check() {
        warn!("{}", e);
    }

    match cli.format {
        OutputFormat::Text => print_text(&analysis),
        OutputFormat::Json => {
            let out = serde_json::json!({
                "diagnostics": analysis.diagnostics,
                "summary": analysis.summary,
                "abandoned_chains": analysis.abandoned_chains,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
