use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::data::panel::{mean_daily_pearson, Panel};
use crate::data::stock_data::StockData;
use crate::error::DataError;
use crate::expr::Expr;

/// Scores expressions against a fixed prediction target on one dataset.
pub trait AlphaCalculator {
    /// IC of a single expression with the target.
    fn calc_single_ic(&self, expr: &Expr) -> Result<f64, DataError>;

    /// IC between two expressions.
    fn calc_mutual_ic(&self, lhs: &Expr, rhs: &Expr) -> Result<f64, DataError>;

    /// IC of the weighted combination of `exprs` with the target.
    fn calc_pool_ic(&self, exprs: &[Expr], weights: &[f64]) -> Result<f64, DataError>;
}

/// [`AlphaCalculator`] over in-memory [`StockData`].
///
/// Factor values are z-scored per day before any correlation. Evaluated factors are
/// cached by their rendered expression, least recently used first out once the cache
/// holds `cache_capacity` panels.
pub struct StockDataCalculator {
    data: StockData,
    target: Panel,
    cache: RefCell<FactorCache>,
}

/// Pool members are re-scored on every candidate, so the default keeps a few pools' worth.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

struct FactorCache {
    capacity: usize,
    panels: HashMap<String, Rc<Panel>>,
    // front is least recently used
    order: VecDeque<String>,
}

impl FactorCache {
    fn new(capacity: usize) -> Self {
        FactorCache {
            capacity,
            panels: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Rc<Panel>> {
        let panel = Rc::clone(self.panels.get(key)?);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
        Some(panel)
    }

    fn insert(&mut self, key: String, panel: Rc<Panel>) {
        if self.capacity == 0 {
            return;
        }
        while self.panels.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.panels.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.panels.insert(key, panel);
    }
}

impl StockDataCalculator {
    pub fn new(data: StockData, target: &Expr) -> Result<Self, DataError> {
        let target = target.evaluate(&data)?.normalize_by_day();
        Ok(StockDataCalculator {
            data,
            target,
            cache: RefCell::new(FactorCache::new(DEFAULT_CACHE_CAPACITY)),
        })
    }

    /// Keep at most `capacity` evaluated factors; zero disables caching.
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        StockDataCalculator {
            cache: RefCell::new(FactorCache::new(capacity)),
            ..self
        }
    }

    pub fn data(&self) -> &StockData {
        &self.data
    }

    pub fn cached_factors(&self) -> usize {
        self.cache.borrow().panels.len()
    }

    fn factor(&self, expr: &Expr) -> Result<Rc<Panel>, DataError> {
        let key = expr.to_string();
        if let Some(panel) = self.cache.borrow_mut().get(&key) {
            return Ok(panel);
        }
        let panel = Rc::new(expr.evaluate(&self.data)?.normalize_by_day());
        self.cache.borrow_mut().insert(key, Rc::clone(&panel));
        Ok(panel)
    }
}

impl AlphaCalculator for StockDataCalculator {
    fn calc_single_ic(&self, expr: &Expr) -> Result<f64, DataError> {
        let factor = self.factor(expr)?;
        mean_daily_pearson(&factor, &self.target)
    }

    fn calc_mutual_ic(&self, lhs: &Expr, rhs: &Expr) -> Result<f64, DataError> {
        let lhs = self.factor(lhs)?;
        let rhs = self.factor(rhs)?;
        mean_daily_pearson(&lhs, &rhs)
    }

    fn calc_pool_ic(&self, exprs: &[Expr], weights: &[f64]) -> Result<f64, DataError> {
        if exprs.len() != weights.len() {
            return Err(DataError::Shape(format!(
                "{} expressions vs {} weights",
                exprs.len(),
                weights.len()
            )));
        }
        if exprs.is_empty() {
            return Ok(0.0);
        }
        let mut combined = Panel::filled(self.target.n_days(), self.target.n_stocks(), 0.0);
        for (expr, &weight) in exprs.iter().zip(weights) {
            let factor = self.factor(expr)?;
            combined = combined.zip_map(&factor, |acc, v| acc + weight as f32 * v)?;
        }
        mean_daily_pearson(&combined, &self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{FeatureType, Operator};
    use chrono::NaiveDate;

    /// Two stocks with opposite trends so next-day return ranks are stable.
    fn make_calculator() -> StockDataCalculator {
        let n_features = FeatureType::ALL.len();
        let n_stocks = 3;
        let total = 2 + 8 + 1;
        let mut values = vec![1.0; total * n_features * n_stocks];
        for d in 0..total {
            for s in 0..n_stocks {
                let close = 100.0 * (1.0 + 0.01 * (s as f32 + 1.0)).powi(d as i32);
                values[(d * n_features + FeatureType::Close.index()) * n_stocks + s] = close;
                values[(d * n_features + FeatureType::Volume.index()) * n_stocks + s] =
                    (s as f32 + 1.0) * if d % 2 == 0 { 1.0 } else { -1.0 };
            }
        }
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let dates = (0..8).map(|i| start + chrono::Duration::days(i)).collect();
        let data = StockData::new(
            "calc",
            dates,
            vec!["a".into(), "b".into(), "c".into()],
            values,
            2,
            1,
        )
        .unwrap();
        StockDataCalculator::new(data, &Expr::forward_return(1)).unwrap()
    }

    #[test]
    fn test_single_ic_of_perfect_predictor() {
        let calc = make_calculator();
        // stock index order equals growth rate order, and so does 1-day momentum
        let momentum = Expr::binary(
            Operator::Div,
            Expr::feature(FeatureType::Close),
            Expr::rolling(Operator::Ref, Expr::feature(FeatureType::Close), 1),
        );
        let ic = calc.calc_single_ic(&momentum).unwrap();
        assert!((ic - 1.0).abs() < 1e-4, "ic = {ic}");
    }

    #[test]
    fn test_mutual_ic_is_symmetric() {
        let calc = make_calculator();
        let a = Expr::feature(FeatureType::Close);
        let b = Expr::feature(FeatureType::Volume);
        let ab = calc.calc_mutual_ic(&a, &b).unwrap();
        let ba = calc.calc_mutual_ic(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn test_pool_ic_matches_single_for_one_member() {
        let calc = make_calculator();
        let e = Expr::feature(FeatureType::Close);
        let single = calc.calc_single_ic(&e).unwrap();
        let pool = calc.calc_pool_ic(std::slice::from_ref(&e), &[0.7]).unwrap();
        assert!((single - pool).abs() < 1e-6);
        assert_eq!(calc.calc_pool_ic(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_pool_ic_rejects_misaligned_weights() {
        let calc = make_calculator();
        let e = Expr::feature(FeatureType::Close);
        assert!(calc.calc_pool_ic(&[e], &[]).is_err());
    }

    #[test]
    fn test_cache_stays_within_capacity() {
        let calc = make_calculator().with_cache_capacity(4);
        let close = || Expr::feature(FeatureType::Close);
        for i in 0..200 {
            let shifted = Expr::binary(Operator::Add, close(), Expr::constant(i as f32));
            calc.calc_single_ic(&shifted).unwrap();
            assert!(calc.cached_factors() <= 4);
        }
        assert_eq!(calc.cached_factors(), 4);
    }

    #[test]
    fn test_cache_keeps_recently_used_factor() {
        let calc = make_calculator().with_cache_capacity(2);
        let close = Expr::feature(FeatureType::Close);
        let before = calc.calc_single_ic(&close).unwrap();
        for f in [FeatureType::Open, FeatureType::High, FeatureType::Low] {
            calc.calc_single_ic(&close).unwrap();
            calc.calc_single_ic(&Expr::feature(f)).unwrap();
        }
        assert_eq!(calc.cached_factors(), 2);
        assert!(calc.cache.borrow().panels.contains_key(&close.to_string()));
        assert_eq!(calc.calc_single_ic(&close).unwrap(), before);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let calc = make_calculator().with_cache_capacity(0);
        let e = Expr::feature(FeatureType::Close);
        let a = calc.calc_single_ic(&e).unwrap();
        let b = calc.calc_mutual_ic(&e, &e).unwrap();
        assert_eq!(calc.cached_factors(), 0);
        assert!(a.is_finite() && b.is_finite());
    }
}
