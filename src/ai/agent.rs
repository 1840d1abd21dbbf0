use std::path::Path;

use crate::env::{AlphaEnv, AlphaState};
use crate::error::{CheckpointError, TrainingError};
use crate::training::callback::Callback;
use crate::training::logger::MetricLogger;

/// A single (possibly multi-step) transition for replay-based training.
#[derive(Debug, Clone)]
pub struct Experience {
    pub state: AlphaState,
    pub action: usize,
    pub reward: f32,
    pub next_state: AlphaState,
    pub done: bool,
    /// Discount applied to the bootstrap value of `next_state`.
    pub discount: f32,
}

/// Metrics returned from a training update.
#[derive(Debug, Clone, Default)]
pub struct UpdateMetrics {
    pub loss: f32,
    pub policy_entropy: Option<f32>,
}

/// Persists model parameters under a checkpoint stem. The recorder appends its own
/// file extension.
pub trait SaveModel {
    fn save_model(&self, stem: &Path) -> Result<(), CheckpointError>;
}

/// Interface shared by every training algorithm.
pub trait Agent: SaveModel {
    /// Short algorithm name for logs ("PPO", "QRDQN").
    fn algorithm_name(&self) -> &str;

    /// Pick a legal action for `state`. When `training` is true the agent may explore.
    fn select_action(&mut self, state: &AlphaState, training: bool) -> usize;

    /// Environment steps taken so far.
    fn num_timesteps(&self) -> u64;

    /// Train for `total_timesteps` environment steps, invoking `callback` at every
    /// rollout boundary.
    fn learn(
        &mut self,
        env: &mut AlphaEnv,
        total_timesteps: u64,
        callback: &mut dyn Callback,
        logger: &mut dyn MetricLogger,
    ) -> Result<(), TrainingError>;
}
