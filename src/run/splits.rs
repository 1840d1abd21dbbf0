use chrono::NaiveDate;

use crate::error::DataError;

/// Inclusive calendar range of trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DataError> {
        if end < start {
            return Err(DataError::InvalidRange(format!("{end} is before {start}")));
        }
        Ok(TimeRange { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates.
    pub fn parse(start: &str, end: &str) -> Result<Self, DataError> {
        let date = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| DataError::InvalidRange(format!("bad date '{s}': {e}")))
        };
        Self::new(date(start)?, date(end)?)
    }
}

/// Train, validation and test ranges of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSplits {
    pub train: TimeRange,
    pub valid: TimeRange,
    pub test: TimeRange,
}

impl DatasetSplits {
    /// Splits must be chronological and must not overlap.
    pub fn new(train: TimeRange, valid: TimeRange, test: TimeRange) -> Result<Self, DataError> {
        for (earlier, later, name) in [(&train, &valid, "train/valid"), (&valid, &test, "valid/test")] {
            if earlier.end >= later.start {
                return Err(DataError::InvalidRange(format!(
                    "{name} splits overlap: {} >= {}",
                    earlier.end, later.start
                )));
            }
        }
        Ok(DatasetSplits { train, valid, test })
    }

    /// 2019 / 2020 / 2021-2022, used by the policy-gradient entry point.
    pub fn ppo() -> Result<Self, DataError> {
        Self::new(
            TimeRange::parse("2019-01-01", "2019-12-31")?,
            TimeRange::parse("2020-01-01", "2020-12-31")?,
            TimeRange::parse("2021-01-01", "2022-12-31")?,
        )
    }

    /// 2010-2019 / 2020 / 2021-2022, used by the quantile entry point.
    pub fn qcm() -> Result<Self, DataError> {
        Self::new(
            TimeRange::parse("2010-01-01", "2019-12-31")?,
            TimeRange::parse("2020-01-01", "2020-12-31")?,
            TimeRange::parse("2021-01-01", "2022-12-31")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_chronological() {
        let ppo = DatasetSplits::ppo().unwrap();
        assert_eq!(ppo.train, TimeRange::parse("2019-01-01", "2019-12-31").unwrap());
        assert_eq!(ppo.test.end, NaiveDate::from_ymd_opt(2022, 12, 31).unwrap());

        let qcm = DatasetSplits::qcm().unwrap();
        assert_eq!(qcm.train.start, NaiveDate::from_ymd_opt(2010, 1, 1).unwrap());
        assert_eq!(qcm.valid, ppo.valid);
        assert_eq!(qcm.test, ppo.test);
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        assert!(matches!(
            TimeRange::parse("2020-12-31", "2020-01-01"),
            Err(DataError::InvalidRange(_))
        ));
        assert!(TimeRange::parse("2020-13-01", "2020-12-31").is_err());
    }

    #[test]
    fn test_overlapping_splits_are_rejected() {
        let train = TimeRange::parse("2019-01-01", "2020-06-30").unwrap();
        let valid = TimeRange::parse("2020-01-01", "2020-12-31").unwrap();
        let test = TimeRange::parse("2021-01-01", "2021-12-31").unwrap();
        let err = DatasetSplits::new(train, valid, test).unwrap_err();
        assert!(err.to_string().contains("train/valid"));
    }
}
