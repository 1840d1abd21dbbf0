mod ppo;
mod qcm;

pub use ppo::PpoAgent;
pub use qcm::{quantile_huber_loss, QcmAgent, QcmVariant};
