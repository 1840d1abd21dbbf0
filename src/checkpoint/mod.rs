mod metadata;
mod writer;

pub use metadata::{PoolCheckpoint, RunIdentity};
pub use writer::{CheckpointRecord, CheckpointWriter};
