use crate::error::DataError;

/// Dense `[day][stock]` matrix of factor values. Missing values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    n_days: usize,
    n_stocks: usize,
    values: Vec<f32>,
}

impl Panel {
    pub fn new(n_days: usize, n_stocks: usize, values: Vec<f32>) -> Result<Self, DataError> {
        if values.len() != n_days * n_stocks {
            return Err(DataError::Shape(format!(
                "expected {} values for {}x{}, got {}",
                n_days * n_stocks,
                n_days,
                n_stocks,
                values.len()
            )));
        }
        Ok(Panel {
            n_days,
            n_stocks,
            values,
        })
    }

    pub fn filled(n_days: usize, n_stocks: usize, value: f32) -> Self {
        Panel {
            n_days,
            n_stocks,
            values: vec![value; n_days * n_stocks],
        }
    }

    pub fn n_days(&self) -> usize {
        self.n_days
    }

    pub fn n_stocks(&self) -> usize {
        self.n_stocks
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, day: usize) -> &[f32] {
        &self.values[day * self.n_stocks..(day + 1) * self.n_stocks]
    }

    pub fn get(&self, day: usize, stock: usize) -> f32 {
        self.values[day * self.n_stocks + stock]
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Panel {
        Panel {
            n_days: self.n_days,
            n_stocks: self.n_stocks,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Element-wise combination of two panels of identical shape.
    pub fn zip_map(&self, other: &Panel, f: impl Fn(f32, f32) -> f32) -> Result<Panel, DataError> {
        if self.n_days != other.n_days || self.n_stocks != other.n_stocks {
            return Err(DataError::Shape(format!(
                "{}x{} vs {}x{}",
                self.n_days, self.n_stocks, other.n_days, other.n_stocks
            )));
        }
        Ok(Panel {
            n_days: self.n_days,
            n_stocks: self.n_stocks,
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Cross-sectional z-score per day. NaNs (and days with zero spread) become 0.
    pub fn normalize_by_day(&self) -> Panel {
        let mut values = self.values.clone();
        for day in 0..self.n_days {
            let row = &mut values[day * self.n_stocks..(day + 1) * self.n_stocks];
            let finite: Vec<f64> = row
                .iter()
                .filter(|v| v.is_finite())
                .map(|&v| v as f64)
                .collect();
            if finite.is_empty() {
                row.iter_mut().for_each(|v| *v = 0.0);
                continue;
            }
            let mean = finite.iter().sum::<f64>() / finite.len() as f64;
            let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64;
            let std = var.sqrt();
            for v in row.iter_mut() {
                *v = if v.is_finite() && std > 1e-12 {
                    ((*v as f64 - mean) / std) as f32
                } else {
                    0.0
                };
            }
        }
        Panel {
            n_days: self.n_days,
            n_stocks: self.n_stocks,
            values,
        }
    }
}

/// Mean over days of the cross-sectional Pearson correlation between two panels.
///
/// Only stocks where both values are finite take part in a day's correlation; days with
/// fewer than two such stocks or zero variance are skipped. Returns NaN when no day
/// contributes.
pub fn mean_daily_pearson(x: &Panel, y: &Panel) -> Result<f64, DataError> {
    if x.n_days() != y.n_days() || x.n_stocks() != y.n_stocks() {
        return Err(DataError::Shape(format!(
            "{}x{} vs {}x{}",
            x.n_days(),
            x.n_stocks(),
            y.n_days(),
            y.n_stocks()
        )));
    }
    let mut total = 0.0;
    let mut days = 0usize;
    for day in 0..x.n_days() {
        if let Some(corr) = pearson(x.row(day), y.row(day)) {
            total += corr;
            days += 1;
        }
    }
    if days == 0 {
        return Ok(f64::NAN);
    }
    Ok(total / days as f64)
}

fn pearson(a: &[f32], b: &[f32]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x as f64, y as f64))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in &pairs {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        return None;
    }
    Some(cov / denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Panel::new(2, 3, vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_normalize_by_day() {
        let p = Panel::new(1, 4, vec![1.0, 2.0, 3.0, f32::NAN]).unwrap();
        let n = p.normalize_by_day();
        let row = n.row(0);
        assert!((row[0] + row[2]).abs() < 1e-6);
        assert!(row[1].abs() < 1e-6);
        assert_eq!(row[3], 0.0);
    }

    #[test]
    fn test_pearson_of_panel_with_itself_is_one() {
        let p = Panel::new(2, 3, vec![1.0, 2.0, 4.0, 3.0, 1.0, 2.0]).unwrap();
        let ic = mean_daily_pearson(&p, &p).unwrap();
        assert!((ic - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_skips_degenerate_days() {
        let x = Panel::new(2, 3, vec![1.0, 1.0, 1.0, 1.0, 2.0, 3.0]).unwrap();
        let y = Panel::new(2, 3, vec![5.0, 6.0, 7.0, 3.0, 2.0, 1.0]).unwrap();
        let ic = mean_daily_pearson(&x, &y).unwrap();
        assert!((ic + 1.0).abs() < 1e-9);
    }
}
