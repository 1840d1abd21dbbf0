use std::fmt;

use crate::data::{Panel, StockData};
use crate::error::DataError;
use crate::expr::tokens::{FeatureType, Operator};

/// An alpha expression over market features.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Feature(FeatureType),
    Constant(f32),
    Unary(Operator, Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
    /// Single-operand window operator. For `Ref` a negative window reads the future.
    Rolling(Operator, Box<Expr>, i32),
    PairRolling(Operator, Box<Expr>, Box<Expr>, i32),
}

impl Expr {
    pub fn feature(feature: FeatureType) -> Expr {
        Expr::Feature(feature)
    }

    pub fn constant(value: f32) -> Expr {
        Expr::Constant(value)
    }

    pub fn unary(op: Operator, operand: Expr) -> Expr {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn binary(op: Operator, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn rolling(op: Operator, operand: Expr, window: i32) -> Expr {
        Expr::Rolling(op, Box::new(operand), window)
    }

    pub fn pair_rolling(op: Operator, lhs: Expr, rhs: Expr, window: i32) -> Expr {
        Expr::PairRolling(op, Box::new(lhs), Box::new(rhs), window)
    }

    /// `Ref(close, -horizon) / close - 1`: the forward return over `horizon` days.
    pub fn forward_return(horizon: i32) -> Expr {
        let close = Expr::feature(FeatureType::Close);
        Expr::binary(
            Operator::Sub,
            Expr::binary(
                Operator::Div,
                Expr::rolling(Operator::Ref, close.clone(), -horizon),
                close,
            ),
            Expr::constant(1.0),
        )
    }

    /// Whether the expression depends on market data at all.
    pub fn is_featured(&self) -> bool {
        match self {
            Expr::Feature(_) => true,
            Expr::Constant(_) => false,
            Expr::Unary(_, e) | Expr::Rolling(_, e, _) => e.is_featured(),
            Expr::Binary(_, l, r) | Expr::PairRolling(_, l, r, _) => {
                l.is_featured() || r.is_featured()
            }
        }
    }

    /// Evaluate over every requested day of `data`.
    pub fn evaluate(&self, data: &StockData) -> Result<Panel, DataError> {
        self.eval_range(data, 0, data.n_days() as isize)
    }

    /// Evaluate over the day offsets `start..stop`, relative to the first requested day.
    pub fn eval_range(&self, data: &StockData, start: isize, stop: isize) -> Result<Panel, DataError> {
        let n_days = (stop - start).max(0) as usize;
        let n_stocks = data.n_stocks();
        match self {
            Expr::Feature(feature) => {
                let mut values = Vec::with_capacity(n_days * n_stocks);
                for offset in start..stop {
                    values.extend_from_slice(data.feature_row(*feature, offset)?);
                }
                Panel::new(n_days, n_stocks, values)
            }
            Expr::Constant(value) => Ok(Panel::filled(n_days, n_stocks, *value)),
            Expr::Unary(op, operand) => {
                let inner = operand.eval_range(data, start, stop)?;
                Ok(match op {
                    Operator::Abs => inner.map(f32::abs),
                    _ => inner.map(f32::ln),
                })
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval_range(data, start, stop)?;
                let r = rhs.eval_range(data, start, stop)?;
                let f: fn(f32, f32) -> f32 = match op {
                    Operator::Add => |a, b| a + b,
                    Operator::Sub => |a, b| a - b,
                    Operator::Mul => |a, b| a * b,
                    Operator::Div => |a, b| a / b,
                    Operator::Greater => |a: f32, b: f32| {
                        if a.is_nan() || b.is_nan() {
                            f32::NAN
                        } else {
                            a.max(b)
                        }
                    },
                    _ => |a: f32, b: f32| {
                        if a.is_nan() || b.is_nan() {
                            f32::NAN
                        } else {
                            a.min(b)
                        }
                    },
                };
                l.zip_map(&r, f)
            }
            Expr::Rolling(Operator::Ref, operand, window) => {
                let shift = *window as isize;
                operand.eval_range(data, start - shift, stop - shift)
            }
            Expr::Rolling(op, operand, window) => {
                let w = (*window).max(1) as usize;
                let inner = operand.eval_range(data, start - w as isize + 1, stop)?;
                let mut values = Vec::with_capacity(n_days * n_stocks);
                let mut buf = Vec::with_capacity(w);
                for day in 0..n_days {
                    for stock in 0..n_stocks {
                        buf.clear();
                        buf.extend((day..day + w).map(|d| inner.get(d, stock) as f64));
                        values.push(rolling_stat(*op, &buf) as f32);
                    }
                }
                Panel::new(n_days, n_stocks, values)
            }
            Expr::PairRolling(op, lhs, rhs, window) => {
                let w = (*window).max(1) as usize;
                let l = lhs.eval_range(data, start - w as isize + 1, stop)?;
                let r = rhs.eval_range(data, start - w as isize + 1, stop)?;
                let mut values = Vec::with_capacity(n_days * n_stocks);
                let mut xs = Vec::with_capacity(w);
                let mut ys = Vec::with_capacity(w);
                for day in 0..n_days {
                    for stock in 0..n_stocks {
                        xs.clear();
                        ys.clear();
                        xs.extend((day..day + w).map(|d| l.get(d, stock) as f64));
                        ys.extend((day..day + w).map(|d| r.get(d, stock) as f64));
                        let corr = *op == Operator::Corr;
                        values.push(pair_stat(&xs, &ys, corr) as f32);
                    }
                }
                Panel::new(n_days, n_stocks, values)
            }
        }
    }
}

fn rolling_stat(op: Operator, window: &[f64]) -> f64 {
    if window.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = || window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    match op {
        Operator::Mean => mean,
        Operator::Sum => mean * n,
        Operator::Std => var().sqrt(),
        Operator::Var => var(),
        Operator::Max => window.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Operator::Min => window.iter().cloned().fold(f64::INFINITY, f64::min),
        Operator::Delta => window[window.len() - 1] - window[0],
        _ => f64::NAN,
    }
}

fn pair_stat(xs: &[f64], ys: &[f64], corr: bool) -> f64 {
    if xs.iter().chain(ys).any(|v| v.is_nan()) || xs.len() < 2 {
        return f64::NAN;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let cov = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / (n - 1.0);
    if !corr {
        return cov;
    }
    let sx = (xs.iter().map(|x| (x - mx).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let sy = (ys.iter().map(|y| (y - my).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    cov / (sx * sy)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Feature(feature) => write!(f, "${}", feature.name()),
            Expr::Constant(value) => write!(f, "Constant({value:?})"),
            Expr::Unary(op, e) => write!(f, "{}({e})", op.name()),
            Expr::Binary(op, l, r) => write!(f, "{}({l},{r})", op.name()),
            Expr::Rolling(op, e, w) => write!(f, "{}({e},{w})", op.name()),
            Expr::PairRolling(op, l, r, w) => write!(f, "{}({l},{r},{w})", op.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// Close price of stock `s` on padded day `d` is `d + 1 + 10 * s`; other features 1.0.
    fn ramp_data(n_days: usize, backtrack: usize, future: usize) -> StockData {
        let n_stocks = 2;
        let n_features = FeatureType::ALL.len();
        let total = backtrack + n_days + future;
        let mut values = vec![1.0; total * n_features * n_stocks];
        for d in 0..total {
            for s in 0..n_stocks {
                values[(d * n_features + FeatureType::Close.index()) * n_stocks + s] =
                    (d + 1 + 10 * s) as f32;
            }
        }
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let dates = (0..n_days)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        StockData::new(
            "ramp",
            dates,
            vec!["a".into(), "b".into()],
            values,
            backtrack,
            future,
        )
        .unwrap()
    }

    #[test]
    fn test_display() {
        let e = Expr::pair_rolling(
            Operator::Corr,
            Expr::feature(FeatureType::Close),
            Expr::rolling(Operator::Mean, Expr::feature(FeatureType::Volume), 20),
            10,
        );
        assert_eq!(e.to_string(), "Corr($close,Mean($volume,20),10)");
        assert_eq!(
            Expr::forward_return(20).to_string(),
            "Sub(Div(Ref($close,-20),$close),Constant(1.0))"
        );
    }

    #[test]
    fn test_is_featured() {
        assert!(Expr::feature(FeatureType::Open).is_featured());
        assert!(!Expr::binary(Operator::Add, Expr::constant(1.0), Expr::constant(2.0)).is_featured());
        assert!(Expr::binary(Operator::Add, Expr::constant(1.0), Expr::feature(FeatureType::Low)).is_featured());
    }

    #[test]
    fn test_ref_and_mean() {
        let data = ramp_data(3, 5, 2);
        let lag = Expr::rolling(Operator::Ref, Expr::feature(FeatureType::Close), 2)
            .evaluate(&data)
            .unwrap();
        // first requested day is padded day 5 -> close 6; two days back -> 4
        assert_eq!(lag.get(0, 0), 4.0);

        let mean = Expr::rolling(Operator::Mean, Expr::feature(FeatureType::Close), 3)
            .evaluate(&data)
            .unwrap();
        // days 3,4,5 -> closes 4,5,6
        assert!((mean.get(0, 0) - 5.0).abs() < 1e-6);
        assert!((mean.get(0, 1) - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_forward_return_reads_future() {
        let data = ramp_data(2, 0, 1);
        let target = Expr::forward_return(1).evaluate(&data).unwrap();
        // close 1 -> 2 gives +100%
        assert!((target.get(0, 0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_past_history_is_out_of_range() {
        let data = ramp_data(3, 2, 0);
        let res = Expr::rolling(Operator::Mean, Expr::feature(FeatureType::Close), 10).evaluate(&data);
        assert!(matches!(res, Err(DataError::OutOfRange { .. })));
    }

    #[test]
    fn test_pair_rolling_corr_of_ramps() {
        let data = ramp_data(2, 5, 0);
        let corr = Expr::pair_rolling(
            Operator::Corr,
            Expr::feature(FeatureType::Close),
            Expr::binary(Operator::Mul, Expr::feature(FeatureType::Close), Expr::constant(2.0)),
            5,
        )
        .evaluate(&data)
        .unwrap();
        assert!((corr.get(1, 0) - 1.0).abs() < 1e-5);
    }
}
