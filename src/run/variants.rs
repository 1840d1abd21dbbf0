use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ai::{Agent, QcmAgent, QcmVariant};
use crate::checkpoint::{CheckpointWriter, RunIdentity};
use crate::config::QcmConfig;
use crate::data::AlphaCalculator;
use crate::env::AlphaEnv;
use crate::error::{ConfigError, TrainingError};
use crate::pool::AlphaPool;
use crate::run::seed::SeedContext;
use crate::training::{JsonlLogger, TrainingSupervisor};

/// Resolve a command-line model key against the closed set of quantile variants.
pub fn lookup(key: &str) -> Result<QcmVariant, ConfigError> {
    QcmVariant::ALL
        .into_iter()
        .find(|variant| variant.key() == key)
        .ok_or_else(|| ConfigError::UnknownVariant {
            key: key.to_string(),
            known: known_keys(),
        })
}

/// `qrdqn, iqn, fqf`
pub fn known_keys() -> String {
    QcmVariant::ALL.map(QcmVariant::key).join(", ")
}

/// Everything a quantile variant is built from, besides its own hyperparameters.
pub struct SessionParts {
    pub env: AlphaEnv,
    pub valid_calculator: Rc<dyn AlphaCalculator>,
    pub test_calculator: Rc<dyn AlphaCalculator>,
    pub log_dir: PathBuf,
    pub run: RunIdentity,
    pub seed: SeedContext,
    pub std_lam: f64,
}

/// A fully wired quantile run: agent, environment, supervisor and metric log.
pub struct QcmSession {
    agent: QcmAgent,
    env: AlphaEnv,
    supervisor: TrainingSupervisor<AlphaPool>,
    logger: JsonlLogger,
    log_dir: PathBuf,
}

impl QcmSession {
    /// Build the session for `variant`. Checkpoints go under the log directory and the
    /// supervisor also scores the pool on the validation calculator.
    pub fn build(
        variant: QcmVariant,
        parts: SessionParts,
        config: QcmConfig,
    ) -> Result<Self, TrainingError> {
        let agent = QcmAgent::new(variant, config, parts.std_lam, parts.seed.rng("agent"))?;
        let supervisor = TrainingSupervisor::new(
            Rc::clone(parts.env.pool()),
            parts.test_calculator,
            CheckpointWriter::new(parts.log_dir.clone()),
            parts.run,
        )
        .with_valid_calculator(parts.valid_calculator);
        let logger = JsonlLogger::create(&parts.log_dir)?;
        Ok(QcmSession {
            agent,
            env: parts.env,
            supervisor,
            logger,
            log_dir: parts.log_dir,
        })
    }

    pub fn agent(&self) -> &QcmAgent {
        &self.agent
    }

    pub fn supervisor(&self) -> &TrainingSupervisor<AlphaPool> {
        &self.supervisor
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Train for the configured number of steps.
    pub fn run(&mut self) -> Result<(), TrainingError> {
        tracing::info!(
            model = %self.agent.variant(),
            steps = self.agent.config().num_steps,
            log_dir = %self.log_dir.display(),
            "starting quantile training"
        );
        self.agent
            .run(&mut self.env, &mut self.supervisor, &mut self.logger)?;
        tracing::info!(steps = self.agent.num_timesteps(), "training finished");
        Ok(())
    }
}
