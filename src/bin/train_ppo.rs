#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use alpha_qcm::config::PpoConfig;
use alpha_qcm::data::CsvDataSource;
use alpha_qcm::run::{DatasetSplits, RunConfigurator};

/// Mine alpha expressions with a maskable PPO agent.
#[derive(Parser)]
#[command(name = "train_ppo", about = "Train a PPO alpha-mining agent")]
struct Cli {
    /// Random seed for the whole run
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Instrument universe; reads <data-dir>/<instruments>.csv
    #[arg(long, default_value = "csi300")]
    instruments: String,

    /// Alpha pool capacity
    #[arg(long, default_value_t = 10)]
    pool: usize,

    /// Total environment steps
    #[arg(long, default_value_t = 200_000)]
    steps: u64,

    /// Directory holding the market data files
    #[arg(long, default_value = "data/qlib")]
    data_dir: PathBuf,

    /// Run timestamp (YYYYmmddHHMMSS) instead of the current time
    #[arg(long)]
    timestamp: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let splits = DatasetSplits::ppo().context("building dataset splits")?;
    let mut configurator = RunConfigurator::new(
        CsvDataSource::new(&cli.data_dir),
        cli.instruments.as_str(),
        cli.pool,
        splits,
        cli.seed,
    );
    if let Some(timestamp) = &cli.timestamp {
        configurator = configurator.with_timestamp(timestamp.as_str());
    }
    let mut session = configurator
        .ppo_session(PpoConfig::default(), cli.steps)
        .with_context(|| {
            format!(
                "setting up PPO run for '{}' from {}",
                cli.instruments,
                cli.data_dir.display()
            )
        })?;
    session
        .run()
        .with_context(|| format!("training run in {}", session.log_dir().display()))?;
    session.supervisor().show_pool_state();
    Ok(())
}
