use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::data::stock_data::{StockData, MAX_BACKTRACK_DAYS, MAX_FUTURE_DAYS};
use crate::error::DataError;
use crate::expr::FeatureType;

/// Something that can materialise market data for an instrument universe.
pub trait StockDataSource {
    /// Load the trading days in `[start, end]` (inclusive) plus look-back and look-ahead padding.
    fn load(&self, instrument: &str, start: NaiveDate, end: NaiveDate) -> Result<StockData, DataError>;
}

/// Reads `<root>/<instrument>.csv` files whose header names the columns
/// `date,code,open,close,high,low,volume,vwap` in any order. Empty prices are missing.
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    root: PathBuf,
    max_backtrack_days: usize,
    max_future_days: usize,
}

type Row = (NaiveDate, String, [f32; 6]);

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    code: String,
    open: Option<f32>,
    close: Option<f32>,
    high: Option<f32>,
    low: Option<f32>,
    volume: Option<f32>,
    vwap: Option<f32>,
}

impl CsvDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CsvDataSource {
            root: root.into(),
            max_backtrack_days: MAX_BACKTRACK_DAYS,
            max_future_days: MAX_FUTURE_DAYS,
        }
    }

    pub fn with_padding(mut self, max_backtrack_days: usize, max_future_days: usize) -> Self {
        self.max_backtrack_days = max_backtrack_days;
        self.max_future_days = max_future_days;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_rows(&self, path: &Path) -> Result<Vec<Row>, DataError> {
        let text = fs::read_to_string(path).map_err(|source| DataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let malformed = |line: u64, reason: String| DataError::Malformed {
            path: path.to_path_buf(),
            line: line as usize,
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| malformed(1, e.to_string()))?
            .clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                let line = e.position().map_or(0, csv::Position::line);
                malformed(line, e.to_string())
            })?;
            let line = record.position().map_or(0, csv::Position::line);
            let row: CsvRow = record
                .deserialize(Some(&headers))
                .map_err(|e| malformed(line, e.to_string()))?;
            let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
                .map_err(|e| malformed(line, format!("bad date '{}': {e}", row.date)))?;
            // FeatureType::ALL order
            let values = [row.open, row.close, row.high, row.low, row.volume, row.vwap]
                .map(|v| v.unwrap_or(f32::NAN));
            rows.push((date, row.code, values));
        }
        Ok(rows)
    }
}

impl StockDataSource for CsvDataSource {
    fn load(&self, instrument: &str, start: NaiveDate, end: NaiveDate) -> Result<StockData, DataError> {
        if end < start {
            return Err(DataError::InvalidRange(format!("{end} is before {start}")));
        }
        let path = self.root.join(format!("{instrument}.csv"));
        if !path.is_file() {
            return Err(DataError::MissingSource {
                instrument: instrument.to_string(),
                path,
            });
        }
        let rows = self.read_rows(&path)?;

        let all_dates: Vec<NaiveDate> = rows
            .iter()
            .map(|r| r.0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let first = all_dates.partition_point(|d| *d < start);
        let last = all_dates.partition_point(|d| *d <= end);
        if first >= last {
            return Err(DataError::EmptyRange {
                instrument: instrument.to_string(),
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        // Days missing from the file at either edge stay NaN.
        let pad_before = self.max_backtrack_days.saturating_sub(first);
        let window_start = first.saturating_sub(self.max_backtrack_days);
        let window_end = (last + self.max_future_days).min(all_dates.len());
        let window = &all_dates[window_start..window_end];
        let day_index: HashMap<NaiveDate, usize> = window
            .iter()
            .enumerate()
            .map(|(i, d)| (*d, i + pad_before))
            .collect();

        let stock_ids: Vec<String> = rows
            .iter()
            .filter(|r| day_index.contains_key(&r.0))
            .map(|r| r.1.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let stock_index: BTreeMap<&str, usize> = stock_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let n_days = last - first;
        let n_stocks = stock_ids.len();
        let n_features = FeatureType::ALL.len();
        let total_days = self.max_backtrack_days + n_days + self.max_future_days;
        let mut values = vec![f32::NAN; total_days * n_features * n_stocks];
        for (date, code, features) in &rows {
            let (Some(&day), Some(&stock)) = (day_index.get(date), stock_index.get(code.as_str()))
            else {
                continue;
            };
            for (f, value) in features.iter().enumerate() {
                values[(day * n_features + f) * n_stocks + stock] = *value;
            }
        }

        tracing::debug!(
            instrument,
            %start,
            %end,
            n_days,
            n_stocks,
            "loaded stock data"
        );
        StockData::new(
            instrument,
            all_dates[first..last].to_vec(),
            stock_ids,
            values,
            self.max_backtrack_days,
            self.max_future_days,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, m, d).unwrap()
    }

    fn write_csv(dir: &Path) {
        let mut text = String::from("date,code,open,close,high,low,volume,vwap\n");
        for day in 1..=6u32 {
            for (code, base) in [("SH600000", 10.0), ("SZ000001", 20.0)] {
                let close = base + day as f32;
                text.push_str(&format!(
                    "2020-01-0{day},{code},{close},{close},{close},{close},100,{close}\n"
                ));
            }
        }
        // a stock that only trades on day 6
        text.push_str("2020-01-06,SZ300750,1,1,1,1,,1\n");
        fs::write(dir.join("test.csv"), text).unwrap();
    }

    #[test]
    fn test_load_with_padding() {
        let dir = TempDir::new().unwrap();
        write_csv(dir.path());
        let source = CsvDataSource::new(dir.path()).with_padding(2, 1);
        let data = source.load("test", date(1, 3), date(1, 4)).unwrap();

        assert_eq!(data.n_days(), 2);
        assert_eq!(data.dates(), &[date(1, 3), date(1, 4)]);
        assert_eq!(data.stock_ids(), &["SH600000".to_string(), "SZ000001".to_string()]);
        assert_eq!(data.feature_row(FeatureType::Close, 0).unwrap(), &[13.0, 23.0]);
        assert_eq!(data.feature_row(FeatureType::Close, -2).unwrap(), &[11.0, 21.0]);
        assert_eq!(data.feature_row(FeatureType::Close, 2).unwrap(), &[15.0, 25.0]);
    }

    #[test]
    fn test_missing_history_is_nan() {
        let dir = TempDir::new().unwrap();
        write_csv(dir.path());
        let source = CsvDataSource::new(dir.path()).with_padding(3, 0);
        let data = source.load("test", date(1, 1), date(1, 6)).unwrap();
        assert_eq!(data.n_stocks(), 3);
        assert!(data.feature_row(FeatureType::Open, -1).unwrap()[0].is_nan());
        // empty volume field parses as NaN
        assert!(data.feature_row(FeatureType::Volume, 5).unwrap()[2].is_nan());
    }

    #[test]
    fn test_missing_instrument() {
        let dir = TempDir::new().unwrap();
        let err = CsvDataSource::new(dir.path())
            .load("csi300", date(1, 1), date(1, 2))
            .unwrap_err();
        assert!(matches!(err, DataError::MissingSource { .. }));
    }

    #[test]
    fn test_empty_range() {
        let dir = TempDir::new().unwrap();
        write_csv(dir.path());
        let err = CsvDataSource::new(dir.path())
            .load("test", date(2, 1), date(2, 5))
            .unwrap_err();
        assert!(matches!(err, DataError::EmptyRange { .. }));
    }

    #[test]
    fn test_malformed_row() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.csv"), "date,code\n2020-01-01,X\n").unwrap();
        let err = CsvDataSource::new(dir.path())
            .load("bad", date(1, 1), date(1, 2))
            .unwrap_err();
        assert!(matches!(err, DataError::Malformed { line: 2, .. }), "{err:?}");

        fs::write(
            dir.path().join("bad.csv"),
            "date,code,open,close,high,low,volume,vwap\n2020-01-01,X,1,1,1,1,1,1\n20200102,X,1,1,1,1,1,1\n",
        )
        .unwrap();
        let err = CsvDataSource::new(dir.path())
            .load("bad", date(1, 1), date(1, 2))
            .unwrap_err();
        assert!(matches!(err, DataError::Malformed { line: 3, .. }), "{err:?}");

        fs::write(dir.path().join("bad.csv"), "date,code,open\n2020-01-01,X,1,2\n").unwrap();
        let err = CsvDataSource::new(dir.path())
            .load("bad", date(1, 1), date(1, 2))
            .unwrap_err();
        assert!(matches!(err, DataError::Malformed { .. }), "{err:?}");
    }

    #[test]
    fn test_columns_matched_by_header() {
        let dir = TempDir::new().unwrap();
        let text = "\
code,date,vwap,volume,low,high,close,open
SH600000,2020-01-01,6,5,4,3,2,1
\"SZ000001\",2020-01-01,\"16\",15,14,13,12,11
SH600000,2020-01-02,6,5,4,3,2,1
SZ000001,2020-01-02, 16 ,15,14,13,12,11
";
        fs::write(dir.path().join("shuffled.csv"), text).unwrap();
        let data = CsvDataSource::new(dir.path())
            .with_padding(0, 0)
            .load("shuffled", date(1, 1), date(1, 2))
            .unwrap();
        assert_eq!(data.stock_ids(), &["SH600000".to_string(), "SZ000001".to_string()]);
        for (feature, expected) in [
            (FeatureType::Open, [1.0, 11.0]),
            (FeatureType::Close, [2.0, 12.0]),
            (FeatureType::High, [3.0, 13.0]),
            (FeatureType::Low, [4.0, 14.0]),
            (FeatureType::Volume, [5.0, 15.0]),
            (FeatureType::Vwap, [6.0, 16.0]),
        ] {
            assert_eq!(data.feature_row(feature, 0).unwrap(), &expected);
            assert_eq!(data.feature_row(feature, 1).unwrap(), &expected);
        }
    }
}
