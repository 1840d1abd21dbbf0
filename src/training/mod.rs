//! Training infrastructure: rollout callbacks, the pool supervisor, metric
//! logging, replay memories and rolling statistics.

pub mod callback;
pub mod evaluator;
pub mod logger;
pub mod metrics;
pub mod replay_buffer;
pub mod supervisor;

pub use callback::{Callback, NoopCallback, RolloutContext};
pub use evaluator::{IcEvaluator, MetricEvaluator};
pub use logger::{InMemoryLogger, JsonlLogger, MetricLogger};
pub use supervisor::{format_pool_state, TrainingSupervisor};
