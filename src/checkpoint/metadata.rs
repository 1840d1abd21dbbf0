use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::pool::PoolSnapshot;

/// Pool state written next to each model checkpoint as `<stem>_pool.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCheckpoint {
    pub weights: Vec<f64>,
    pub exprs: Vec<String>,
    pub ics_ret: Vec<f64>,
    pub best_ic_ret: f64,
}

impl From<&PoolSnapshot> for PoolCheckpoint {
    fn from(snapshot: &PoolSnapshot) -> Self {
        PoolCheckpoint {
            weights: snapshot.weights.clone(),
            exprs: snapshot.expressions.clone(),
            ics_ret: snapshot.in_sample_metrics.clone(),
            best_ic_ret: snapshot.best_ensemble_metric,
        }
    }
}

/// Name and start time of one training run. Every checkpoint path of the run derives
/// from it, so it is fixed once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    name_prefix: String,
    timestamp: String,
}

impl RunIdentity {
    pub fn new(name_prefix: impl Into<String>, timestamp: impl Into<String>) -> Self {
        RunIdentity {
            name_prefix: name_prefix.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Stamp the run with the local wall-clock time rendered by a `strftime` pattern.
    pub fn now(name_prefix: impl Into<String>, format: &str) -> Self {
        Self::new(name_prefix, Local::now().format(format).to_string())
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `<name_prefix>_<timestamp>`
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.name_prefix, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_checkpoint_json_keys() {
        let snapshot = PoolSnapshot {
            size: 1,
            weights: vec![0.25],
            expressions: vec!["Mean($close,20)".into()],
            in_sample_metrics: vec![0.04],
            best_ensemble_metric: 0.05,
            evaluation_count: 9,
        };
        let json = serde_json::to_value(PoolCheckpoint::from(&snapshot)).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["best_ic_ret", "exprs", "ics_ret", "weights"]);
        assert_eq!(json["exprs"][0], "Mean($close,20)");
    }

    #[test]
    fn test_run_identity_dir_name() {
        let run = RunIdentity::new("ppo_csi300_10_0", "20240101120000");
        assert_eq!(run.dir_name(), "ppo_csi300_10_0_20240101120000");
        let now = RunIdentity::now("x", "%Y%m%d%H%M%S");
        assert_eq!(now.timestamp().len(), 14);
    }
}
