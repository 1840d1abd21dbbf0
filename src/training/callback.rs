use crate::ai::SaveModel;
use crate::error::TrainingError;
use crate::training::logger::MetricLogger;

/// What the training loop exposes to a callback at a rollout boundary.
pub struct RolloutContext<'a> {
    /// Global environment step counter.
    pub num_timesteps: u64,
    pub model: &'a dyn SaveModel,
    pub logger: &'a mut dyn MetricLogger,
}

/// Hooks invoked synchronously by the training loop. An error aborts training.
pub trait Callback {
    fn on_run_start(&mut self) -> Result<(), TrainingError> {
        Ok(())
    }

    fn on_rollout_end(&mut self, ctx: RolloutContext<'_>) -> Result<(), TrainingError>;
}

/// Callback that does nothing.
pub struct NoopCallback;

impl Callback for NoopCallback {
    fn on_rollout_end(&mut self, _ctx: RolloutContext<'_>) -> Result<(), TrainingError> {
        Ok(())
    }
}
