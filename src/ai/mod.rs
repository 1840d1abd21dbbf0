mod agent;
pub mod algorithms;
pub mod networks;
pub mod state_encoding;

use burn::backend::{Autodiff, NdArray};

pub use agent::{Agent, Experience, SaveModel, UpdateMetrics};
pub use algorithms::{PpoAgent, QcmAgent, QcmVariant};

/// Backend used for action selection and target networks.
pub type InferBackend = NdArray<f32>;
/// Backend used for gradient updates.
pub type TrainBackend = Autodiff<InferBackend>;
