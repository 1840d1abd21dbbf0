use crate::data::AlphaCalculator;
use crate::error::DataError;
use crate::pool::EnsembleScorer;

/// Scores the live pool's current ensemble on a held-out dataset.
///
/// Implementations must not change the pool and must return the same value for the
/// same pool state and dataset.
pub trait MetricEvaluator {
    /// Key suffix used when logging, e.g. `ic` in `test/ic`.
    fn metric_name(&self) -> &str;

    fn evaluate(
        &self,
        pool: &dyn EnsembleScorer,
        dataset: &dyn AlphaCalculator,
    ) -> Result<f64, DataError>;
}

/// Information coefficient of the weighted ensemble with the dataset's target.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcEvaluator;

impl MetricEvaluator for IcEvaluator {
    fn metric_name(&self) -> &str {
        "ic"
    }

    fn evaluate(
        &self,
        pool: &dyn EnsembleScorer,
        dataset: &dyn AlphaCalculator,
    ) -> Result<f64, DataError> {
        pool.test_ensemble(dataset)
    }
}
