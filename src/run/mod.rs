//! Run assembly: seeding, dataset splits, log naming and model dispatch.

mod configurator;
pub mod naming;
mod seed;
pub mod splits;
pub mod variants;

pub use configurator::{PpoSession, RunConfigurator, RunContext, TARGET_HORIZON};
pub use seed::{reseed_everything, SeedContext};
pub use splits::{DatasetSplits, TimeRange};
pub use variants::{QcmSession, SessionParts};
