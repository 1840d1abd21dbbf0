mod alpha_pool;

pub use alpha_pool::{AlphaPool, AlphaPoolConfig};

use crate::data::AlphaCalculator;
use crate::error::DataError;

/// Weights with a magnitude above this count as significant pool members.
pub const SIGNIFICANCE_THRESHOLD: f64 = 1e-4;

/// Point-in-time view of an alpha pool. Slot `i` of `weights`, `expressions` and
/// `in_sample_metrics` always describes the same member.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub size: usize,
    pub weights: Vec<f64>,
    pub expressions: Vec<String>,
    pub in_sample_metrics: Vec<f64>,
    pub best_ensemble_metric: f64,
    pub evaluation_count: u64,
}

impl PoolSnapshot {
    /// Number of members whose weight magnitude exceeds [`SIGNIFICANCE_THRESHOLD`].
    pub fn significant_count(&self) -> usize {
        self.weights[..self.size]
            .iter()
            .filter(|w| w.abs() > SIGNIFICANCE_THRESHOLD)
            .count()
    }
}

/// Read-only access to a pool's current state.
pub trait PoolStateView {
    fn snapshot(&self) -> PoolSnapshot;
}

/// Scores a pool's current ensemble on a dataset other than the one it was built on.
pub trait EnsembleScorer {
    fn test_ensemble(&self, calculator: &dyn AlphaCalculator) -> Result<f64, DataError>;
}
