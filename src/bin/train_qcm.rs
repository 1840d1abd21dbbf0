#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use alpha_qcm::data::CsvDataSource;
use alpha_qcm::run::{DatasetSplits, RunConfigurator};

/// Mine alpha expressions with a distributional (quantile) Q-learning agent.
#[derive(Parser)]
#[command(name = "train_qcm", about = "Train a quantile alpha-mining agent")]
struct Cli {
    /// Quantile variant: qrdqn, iqn or fqf
    #[arg(long, default_value = "qrdqn")]
    model: String,

    /// Random seed for the whole run
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Alpha pool capacity
    #[arg(long, default_value_t = 20)]
    pool: usize,

    /// Weight of the return spread in the action score
    #[arg(long, default_value_t = 1.0)]
    std_lam: f64,

    /// Directory holding <model>.toml
    #[arg(long, default_value = "config/qcm_config")]
    config_dir: PathBuf,

    /// Directory holding the market data files
    #[arg(long, default_value = "data/qlib")]
    data_dir: PathBuf,

    /// Run timestamp (YYYYmmdd-HHMM) instead of the current time
    #[arg(long)]
    timestamp: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let splits = DatasetSplits::qcm().context("building dataset splits")?;
    let mut configurator = RunConfigurator::new(
        CsvDataSource::new(&cli.data_dir),
        "all",
        cli.pool,
        splits,
        cli.seed,
    );
    if let Some(timestamp) = &cli.timestamp {
        configurator = configurator.with_timestamp(timestamp.as_str());
    }
    let mut session = configurator
        .qcm_session(&cli.model, &cli.config_dir, cli.std_lam)
        .with_context(|| format!("setting up {} run", cli.model))?;
    session
        .run()
        .with_context(|| format!("training run in {}", session.log_dir().display()))?;
    session.supervisor().show_pool_state();
    Ok(())
}
