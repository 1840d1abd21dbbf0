use chrono::NaiveDate;

use crate::error::DataError;
use crate::expr::FeatureType;

/// Trading days loaded before the first requested day so rolling windows have history.
pub const MAX_BACKTRACK_DAYS: usize = 100;
/// Trading days loaded after the last requested day for forward-looking targets.
pub const MAX_FUTURE_DAYS: usize = 30;

/// Market data for one instrument universe over one time range.
///
/// Values are stored as `[day][feature][stock]`, where the day axis covers
/// `max_backtrack_days` padding days, the `n_days` requested days, and
/// `max_future_days` trailing days. Unavailable values are NaN.
#[derive(Debug, Clone)]
pub struct StockData {
    instrument: String,
    dates: Vec<NaiveDate>,
    stock_ids: Vec<String>,
    values: Vec<f32>,
    max_backtrack_days: usize,
    max_future_days: usize,
}

impl StockData {
    pub fn new(
        instrument: impl Into<String>,
        dates: Vec<NaiveDate>,
        stock_ids: Vec<String>,
        values: Vec<f32>,
        max_backtrack_days: usize,
        max_future_days: usize,
    ) -> Result<Self, DataError> {
        let instrument = instrument.into();
        if dates.is_empty() {
            return Err(DataError::EmptyRange {
                instrument,
                start: "-".into(),
                end: "-".into(),
            });
        }
        let total_days = max_backtrack_days + dates.len() + max_future_days;
        let expected = total_days * FeatureType::ALL.len() * stock_ids.len();
        if values.len() != expected {
            return Err(DataError::Shape(format!(
                "expected {expected} values for {total_days} days x {} features x {} stocks, got {}",
                FeatureType::ALL.len(),
                stock_ids.len(),
                values.len()
            )));
        }
        Ok(StockData {
            instrument,
            dates,
            stock_ids,
            values,
            max_backtrack_days,
            max_future_days,
        })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Requested trading days (padding excluded).
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn stock_ids(&self) -> &[String] {
        &self.stock_ids
    }

    pub fn n_days(&self) -> usize {
        self.dates.len()
    }

    pub fn n_stocks(&self) -> usize {
        self.stock_ids.len()
    }

    pub fn max_backtrack_days(&self) -> usize {
        self.max_backtrack_days
    }

    pub fn max_future_days(&self) -> usize {
        self.max_future_days
    }

    /// Half-open range of day offsets (relative to the first requested day) that hold data.
    pub fn offset_bounds(&self) -> (isize, isize) {
        (
            -(self.max_backtrack_days as isize),
            (self.n_days() + self.max_future_days) as isize,
        )
    }

    /// Cross-section of one feature on the day at `offset`.
    pub fn feature_row(&self, feature: FeatureType, offset: isize) -> Result<&[f32], DataError> {
        let (min, max) = self.offset_bounds();
        if offset < min || offset >= max {
            return Err(DataError::OutOfRange { offset, min, max });
        }
        let day = (offset + self.max_backtrack_days as isize) as usize;
        let n_stocks = self.n_stocks();
        let start = (day * FeatureType::ALL.len() + feature.index()) * n_stocks;
        Ok(&self.values[start..start + n_stocks])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn test_shape_validation() {
        let err = StockData::new("x", vec![date(1)], vec!["a".into()], vec![0.0; 3], 1, 1);
        assert!(matches!(err, Err(DataError::Shape(_))));
    }

    #[test]
    fn test_feature_row_and_bounds() {
        let n_features = FeatureType::ALL.len();
        // 1 backtrack + 2 days + 1 future, 2 stocks
        let mut values = vec![0.0; 4 * n_features * 2];
        for day in 0..4 {
            for stock in 0..2 {
                let idx = (day * n_features + FeatureType::Close.index()) * 2 + stock;
                values[idx] = (day * 10 + stock) as f32;
            }
        }
        let data = StockData::new(
            "test",
            vec![date(2), date(3)],
            vec!["a".into(), "b".into()],
            values,
            1,
            1,
        )
        .unwrap();

        assert_eq!(data.offset_bounds(), (-1, 3));
        assert_eq!(data.feature_row(FeatureType::Close, -1).unwrap(), &[0.0, 1.0]);
        assert_eq!(data.feature_row(FeatureType::Close, 0).unwrap(), &[10.0, 11.0]);
        assert_eq!(data.feature_row(FeatureType::Close, 2).unwrap(), &[30.0, 31.0]);
        assert!(matches!(
            data.feature_row(FeatureType::Close, 3),
            Err(DataError::OutOfRange { .. })
        ));
    }
}
