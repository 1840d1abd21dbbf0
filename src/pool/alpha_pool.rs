use std::rc::Rc;

use crate::data::AlphaCalculator;
use crate::error::{ConfigError, DataError};
use crate::expr::Expr;
use crate::pool::{EnsembleScorer, PoolSnapshot, PoolStateView};

/// Candidates whose IC with an existing member exceeds this are rejected as duplicates.
const MUTUAL_IC_THRESHOLD: f64 = 0.99;

/// Tuning for [`AlphaPool`].
#[derive(Debug, Clone)]
pub struct AlphaPoolConfig {
    pub capacity: usize,
    pub ic_lower_bound: Option<f64>,
    pub l1_alpha: f64,
    pub learning_rate: f64,
    /// Optimisation stops after this many iterations without improvement.
    pub patience: usize,
    pub max_iterations: usize,
}

impl AlphaPoolConfig {
    pub fn new(capacity: usize) -> Self {
        AlphaPoolConfig {
            capacity,
            ic_lower_bound: None,
            l1_alpha: 5e-3,
            learning_rate: 5e-4,
            patience: 500,
            max_iterations: 10_000,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Validation("pool capacity must be > 0".into()));
        }
        if self.l1_alpha < 0.0 || self.learning_rate <= 0.0 {
            return Err(ConfigError::Validation(
                "pool l1_alpha must be >= 0 and learning_rate > 0".into(),
            ));
        }
        Ok(())
    }
}

/// A bounded, linearly weighted ensemble of alpha expressions.
///
/// New candidates are scored on the training calculator; the weights of the whole
/// pool are refit after each accepted candidate and the least useful member is
/// evicted once the pool is over capacity.
pub struct AlphaPool {
    config: AlphaPoolConfig,
    calculator: Rc<dyn AlphaCalculator>,
    exprs: Vec<Expr>,
    single_ics: Vec<f64>,
    /// Symmetric, unit diagonal.
    mutual_ics: Vec<Vec<f64>>,
    weights: Vec<f64>,
    best_ic_ret: f64,
    eval_cnt: u64,
}

impl AlphaPool {
    pub fn new(config: AlphaPoolConfig, calculator: Rc<dyn AlphaCalculator>) -> Self {
        AlphaPool {
            config,
            calculator,
            exprs: Vec::new(),
            single_ics: Vec::new(),
            mutual_ics: Vec::new(),
            weights: Vec::new(),
            best_ic_ret: -1.0,
            eval_cnt: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn size(&self) -> usize {
        self.exprs.len()
    }

    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn best_ic_ret(&self) -> f64 {
        self.best_ic_ret
    }

    /// Offer a candidate to the pool. Returns the ensemble IC on the training data after
    /// the offer, or 0 when the candidate is rejected.
    pub fn try_new_expr(&mut self, expr: Expr) -> Result<f64, DataError> {
        if self.config.capacity == 0 {
            return Ok(0.0);
        }
        let ic = self.calculator.calc_single_ic(&expr)?;
        if ic.is_nan() || self.config.ic_lower_bound.is_some_and(|lb| ic < lb) {
            return Ok(0.0);
        }
        let mut mutual = Vec::with_capacity(self.exprs.len());
        for existing in &self.exprs {
            let m = self.calculator.calc_mutual_ic(&expr, existing)?;
            if m.is_nan() || m > MUTUAL_IC_THRESHOLD {
                return Ok(0.0);
            }
            mutual.push(m);
        }

        self.add(expr, ic, mutual);
        if self.size() > 1 {
            let new_weights = self.optimize();
            let new_idx = self.size() - 1;
            let worst = argmin_abs(&new_weights);
            if self.size() > self.config.capacity && worst == new_idx {
                // The candidate is the weakest member; keep the previous ensemble.
                self.remove(new_idx);
            } else {
                self.weights = new_weights;
                if self.size() > self.config.capacity {
                    self.remove(worst);
                }
            }
        }

        let ic_ret = self.evaluate_ensemble()?;
        if ic_ret > self.best_ic_ret {
            self.best_ic_ret = ic_ret;
        }
        self.eval_cnt += 1;
        Ok(ic_ret)
    }

    /// Ensemble IC on the training calculator.
    pub fn evaluate_ensemble(&self) -> Result<f64, DataError> {
        self.calculator.calc_pool_ic(&self.exprs, &self.weights)
    }

    fn add(&mut self, expr: Expr, ic: f64, mutual: Vec<f64>) {
        for (row, m) in self.mutual_ics.iter_mut().zip(&mutual) {
            row.push(*m);
        }
        let mut row = mutual;
        row.push(1.0);
        self.mutual_ics.push(row);
        self.exprs.push(expr);
        self.single_ics.push(ic);
        self.weights.push(ic);
    }

    fn remove(&mut self, idx: usize) {
        self.exprs.remove(idx);
        self.single_ics.remove(idx);
        self.weights.remove(idx);
        self.mutual_ics.remove(idx);
        for row in &mut self.mutual_ics {
            row.remove(idx);
        }
    }

    /// Minimise `wᵀMw − 2wᵀr + 1 + α‖w‖₁` with Adam, starting from the current weights.
    fn optimize(&self) -> Vec<f64> {
        let n = self.size();
        let alpha = self.config.l1_alpha;
        let lr = self.config.learning_rate;
        let (beta1, beta2, eps): (f64, f64, f64) = (0.9, 0.999, 1e-8);

        let loss = |w: &[f64]| {
            let mut quad = 0.0;
            for i in 0..n {
                for j in 0..n {
                    quad += w[i] * self.mutual_ics[i][j] * w[j];
                }
            }
            let lin: f64 = w.iter().zip(&self.single_ics).map(|(a, b)| a * b).sum();
            let l1: f64 = w.iter().map(|v| v.abs()).sum();
            quad - 2.0 * lin + 1.0 + alpha * l1
        };

        let mut w = self.weights.clone();
        let mut m = vec![0.0; n];
        let mut v = vec![0.0; n];
        let mut best = w.clone();
        let mut best_loss = loss(&w);
        let mut since_best = 0;
        for t in 1..=self.config.max_iterations {
            for i in 0..n {
                let mw: f64 = (0..n).map(|j| self.mutual_ics[i][j] * w[j]).sum();
                let g = 2.0 * mw - 2.0 * self.single_ics[i] + alpha * signum(w[i]);
                m[i] = beta1 * m[i] + (1.0 - beta1) * g;
                v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
                let m_hat = m[i] / (1.0 - beta1.powi(t as i32));
                let v_hat = v[i] / (1.0 - beta2.powi(t as i32));
                w[i] -= lr * m_hat / (v_hat.sqrt() + eps);
            }
            let current = loss(&w);
            if current < best_loss {
                best_loss = current;
                best.copy_from_slice(&w);
                since_best = 0;
            } else {
                since_best += 1;
                if since_best >= self.config.patience {
                    break;
                }
            }
        }
        best
    }
}

fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn argmin_abs(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map_or(0, |(i, _)| i)
}

impl PoolStateView for AlphaPool {
    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            size: self.size(),
            weights: self.weights.clone(),
            expressions: self.exprs.iter().map(Expr::to_string).collect(),
            in_sample_metrics: self.single_ics.clone(),
            best_ensemble_metric: self.best_ic_ret,
            evaluation_count: self.eval_cnt,
        }
    }
}

impl EnsembleScorer for AlphaPool {
    fn test_ensemble(&self, calculator: &dyn AlphaCalculator) -> Result<f64, DataError> {
        calculator.calc_pool_ic(&self.exprs, &self.weights)
    }
}
