use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ai::{Agent, PpoAgent};
use crate::checkpoint::{CheckpointWriter, RunIdentity};
use crate::config::{PpoConfig, QcmConfig};
use crate::data::{AlphaCalculator, StockDataCalculator, StockDataSource};
use crate::env::AlphaEnv;
use crate::error::TrainingError;
use crate::expr::Expr;
use crate::pool::{AlphaPool, AlphaPoolConfig};
use crate::run::naming::{self, PPO_TIME_FORMAT, QCM_TIME_FORMAT};
use crate::run::seed::{reseed_everything, SeedContext};
use crate::run::splits::{DatasetSplits, TimeRange};
use crate::run::variants::{self, QcmSession, SessionParts};
use crate::training::{JsonlLogger, TrainingSupervisor};

/// Days ahead of the prediction target.
pub const TARGET_HORIZON: i32 = 20;

/// Shared objects of one run, built in dependency order by [`RunConfigurator::build`].
pub struct RunContext {
    pub seed: SeedContext,
    pub pool: Rc<RefCell<AlphaPool>>,
    pub env: AlphaEnv,
    pub valid_calculator: Rc<dyn AlphaCalculator>,
    pub test_calculator: Rc<dyn AlphaCalculator>,
}

/// Assembles a training run from its command-line parameters.
pub struct RunConfigurator<S> {
    source: S,
    instruments: String,
    pool_capacity: usize,
    splits: DatasetSplits,
    seed: u64,
    ic_lower_bound: Option<f64>,
    log_root: PathBuf,
    timestamp: Option<String>,
}

impl<S: StockDataSource> RunConfigurator<S> {
    pub fn new(
        source: S,
        instruments: impl Into<String>,
        pool_capacity: usize,
        splits: DatasetSplits,
        seed: u64,
    ) -> Self {
        RunConfigurator {
            source,
            instruments: instruments.into(),
            pool_capacity,
            splits,
            seed,
            ic_lower_bound: None,
            log_root: PathBuf::from("data"),
            timestamp: None,
        }
    }

    /// Reject pool candidates whose training IC is below `bound`.
    pub fn with_ic_lower_bound(mut self, bound: f64) -> Self {
        self.ic_lower_bound = Some(bound);
        self
    }

    /// Directory that receives `ppo_logs/` and `alpha_logs/`. Defaults to `data`.
    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    /// Use `timestamp` in run names and log directories instead of the wall clock.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    fn pool_config(&self) -> AlphaPoolConfig {
        let mut config = AlphaPoolConfig::new(self.pool_capacity);
        config.ic_lower_bound = self.ic_lower_bound;
        config
    }

    fn run_identity(&self, name: String, format: &str) -> RunIdentity {
        match &self.timestamp {
            Some(timestamp) => RunIdentity::new(name, timestamp.clone()),
            None => RunIdentity::now(name, format),
        }
    }

    /// Seed, load the three datasets, then build the pool on the training
    /// calculator and the environment around the pool.
    pub fn build(&self) -> Result<RunContext, TrainingError> {
        let config = self.pool_config();
        config.validate()?;
        let seed = reseed_everything(self.seed);
        let target = Expr::forward_return(TARGET_HORIZON);

        let train = self.calculator(&self.splits.train, &target)?;
        let valid = self.calculator(&self.splits.valid, &target)?;
        let test = self.calculator(&self.splits.test, &target)?;

        let pool = Rc::new(RefCell::new(AlphaPool::new(config, train)));
        let env = AlphaEnv::new(Rc::clone(&pool));
        tracing::info!(
            instruments = %self.instruments,
            capacity = self.pool_capacity,
            seed = self.seed,
            "run assembled"
        );

        Ok(RunContext {
            seed,
            pool,
            env,
            valid_calculator: valid,
            test_calculator: test,
        })
    }

    fn calculator(
        &self,
        range: &TimeRange,
        target: &Expr,
    ) -> Result<Rc<dyn AlphaCalculator>, TrainingError> {
        let data = self.source.load(&self.instruments, range.start, range.end)?;
        tracing::debug!(
            start = %range.start,
            end = %range.end,
            days = data.n_days(),
            stocks = data.n_stocks(),
            "dataset loaded"
        );
        Ok(Rc::new(StockDataCalculator::new(data, target)?))
    }

    /// Policy-gradient run: checkpoints and metrics go to
    /// `<log_root>/ppo_logs/pool_<pool>/<name>-<timestamp>`.
    pub fn ppo_session(&self, config: PpoConfig, steps: u64) -> Result<PpoSession, TrainingError> {
        config.validate()?;
        let ctx = self.build()?;

        let name = naming::ppo_run_name(&self.instruments, self.pool_capacity, self.seed);
        let run = self.run_identity(name, PPO_TIME_FORMAT);
        let log_dir = naming::ppo_log_dir(
            &self.log_root,
            self.pool_capacity,
            run.name_prefix(),
            run.timestamp(),
        );

        let supervisor = TrainingSupervisor::new(
            ctx.pool,
            ctx.test_calculator,
            CheckpointWriter::new(log_dir.clone()),
            run,
        );
        Ok(PpoSession {
            agent: PpoAgent::new(config, ctx.seed.rng("agent")),
            env: ctx.env,
            supervisor,
            logger: JsonlLogger::create(&log_dir)?,
            log_dir,
            steps,
        })
    }

    /// Quantile run for the model key `model`, configured from
    /// `<config_dir>/<model>.toml`.
    ///
    /// The key and the config file are checked before any data is loaded.
    pub fn qcm_session(
        &self,
        model: &str,
        config_dir: &Path,
        std_lam: f64,
    ) -> Result<QcmSession, TrainingError> {
        let variant = variants::lookup(model)?;
        let config = QcmConfig::load(&config_dir.join(format!("{}.toml", variant.key())))?;
        config.validate(variant)?;

        let ctx = self.build()?;
        let run = self.run_identity(
            naming::qcm_run_name(variant, self.pool_capacity, self.seed),
            QCM_TIME_FORMAT,
        );
        let log_dir = naming::qcm_log_dir(
            &self.log_root,
            variant,
            self.pool_capacity,
            self.seed,
            std_lam,
            run.timestamp(),
            &config,
        );
        let parts = SessionParts {
            env: ctx.env,
            valid_calculator: ctx.valid_calculator,
            test_calculator: ctx.test_calculator,
            log_dir,
            run,
            seed: ctx.seed,
            std_lam,
        };
        QcmSession::build(variant, parts, config)
    }
}

/// A fully wired policy-gradient run.
pub struct PpoSession {
    agent: PpoAgent,
    env: AlphaEnv,
    supervisor: TrainingSupervisor<AlphaPool>,
    logger: JsonlLogger,
    log_dir: PathBuf,
    steps: u64,
}

impl PpoSession {
    pub fn agent(&self) -> &PpoAgent {
        &self.agent
    }

    pub fn supervisor(&self) -> &TrainingSupervisor<AlphaPool> {
        &self.supervisor
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn run(&mut self) -> Result<(), TrainingError> {
        tracing::info!(
            steps = self.steps,
            log_dir = %self.log_dir.display(),
            "starting PPO training"
        );
        self.agent
            .learn(&mut self.env, self.steps, &mut self.supervisor, &mut self.logger)?;
        tracing::info!(steps = self.agent.num_timesteps(), "training finished");
        Ok(())
    }
}
