use std::path::Path;

use crate::ai::QcmVariant;
use crate::error::ConfigError;

/// Hyperparameters for one quantile agent, loaded from `<config-dir>/<model>.toml`.
///
/// `N`, `use_per`, `gamma` and `multi_step` are required for every variant; `lr` is
/// required for qrdqn and iqn, `quantile_lr` for fqf. Everything else has a default.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QcmConfig {
    /// Number of quantiles (fractions) per action.
    #[serde(rename = "N")]
    pub n_quantiles: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantile_lr: Option<f64>,
    pub use_per: bool,
    pub gamma: f64,
    pub multi_step: usize,

    /// Learning rate of the fqf fraction proposal network.
    #[serde(default = "default_fraction_lr")]
    pub fraction_lr: f64,
    /// Entropy bonus on the proposed fractions (fqf).
    #[serde(default)]
    pub ent_coef: f64,
    /// Target-side fraction samples N' for iqn; defaults to `N`.
    #[serde(default, rename = "N_dash", skip_serializing_if = "Option::is_none")]
    pub n_target: Option<usize>,
    /// Fraction samples used for action selection in iqn.
    #[serde(default = "default_k", rename = "K")]
    pub k: usize,
    #[serde(default = "default_kappa")]
    pub kappa: f32,

    #[serde(default = "default_num_steps")]
    pub num_steps: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    #[serde(default = "default_one")]
    pub update_interval: u64,
    #[serde(default = "default_target_update_interval")]
    pub target_update_interval: u64,
    #[serde(default = "default_start_steps")]
    pub start_steps: u64,
    #[serde(default = "default_epsilon_train")]
    pub epsilon_train: f64,
    #[serde(default = "default_epsilon_decay_steps")]
    pub epsilon_decay_steps: u64,
    #[serde(default = "default_eval_interval")]
    pub eval_interval: u64,
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
    /// Max gradient norm; 0 disables clipping.
    #[serde(default = "default_grad_clipping")]
    pub grad_clipping: f32,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_per_alpha")]
    pub per_alpha: f64,
    #[serde(default = "default_per_beta")]
    pub per_beta: f64,
}

fn default_fraction_lr() -> f64 {
    2.5e-9
}
fn default_k() -> usize {
    32
}
fn default_kappa() -> f32 {
    1.0
}
fn default_num_steps() -> u64 {
    300_000
}
fn default_batch_size() -> usize {
    128
}
fn default_memory_size() -> usize {
    100_000
}
fn default_one() -> u64 {
    1
}
fn default_target_update_interval() -> u64 {
    1_000
}
fn default_start_steps() -> u64 {
    1_000
}
fn default_epsilon_train() -> f64 {
    0.01
}
fn default_epsilon_decay_steps() -> u64 {
    20_000
}
fn default_eval_interval() -> u64 {
    5_000
}
fn default_log_interval() -> u64 {
    100
}
fn default_grad_clipping() -> f32 {
    5.0
}
fn default_hidden_size() -> usize {
    128
}
fn default_per_alpha() -> f64 {
    0.6
}
fn default_per_beta() -> f64 {
    0.4
}

impl QcmConfig {
    /// Read and parse a variant config. Call [`QcmConfig::validate`] before use.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Learning rate of the quantile network for `variant`.
    pub fn learning_rate(&self, variant: QcmVariant) -> Result<f64, ConfigError> {
        let (key, value) = match variant {
            QcmVariant::Fqf => ("quantile_lr", self.quantile_lr),
            QcmVariant::Qrdqn | QcmVariant::Iqn => ("lr", self.lr),
        };
        value.ok_or_else(|| {
            ConfigError::Validation(format!(
                "{} config is missing required key '{key}'",
                variant.key()
            ))
        })
    }

    pub fn n_target(&self) -> usize {
        self.n_target.unwrap_or(self.n_quantiles)
    }

    pub fn validate(&self, variant: QcmVariant) -> Result<(), ConfigError> {
        let lr = self.learning_rate(variant)?;
        if lr <= 0.0 {
            return Err(ConfigError::Validation("learning rate must be > 0".into()));
        }
        if self.n_quantiles == 0 {
            return Err(ConfigError::Validation("N must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(ConfigError::Validation("gamma must be in [0, 1]".into()));
        }
        if self.multi_step == 0 {
            return Err(ConfigError::Validation("multi_step must be >= 1".into()));
        }
        if self.kappa <= 0.0 {
            return Err(ConfigError::Validation("kappa must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation("batch_size must be > 0".into()));
        }
        if self.memory_size < self.batch_size {
            return Err(ConfigError::Validation(
                "memory_size must be >= batch_size".into(),
            ));
        }
        if self.update_interval == 0
            || self.target_update_interval == 0
            || self.eval_interval == 0
            || self.log_interval == 0
        {
            return Err(ConfigError::Validation(
                "update, target update, eval and log intervals must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.epsilon_train) {
            return Err(ConfigError::Validation(
                "epsilon_train must be in [0, 1]".into(),
            ));
        }
        if variant == QcmVariant::Iqn && (self.k == 0 || self.n_target() == 0) {
            return Err(ConfigError::Validation("K and N_dash must be > 0".into()));
        }
        if variant == QcmVariant::Fqf && self.fraction_lr <= 0.0 {
            return Err(ConfigError::Validation("fraction_lr must be > 0".into()));
        }
        Ok(())
    }
}

/// PPO hyperparameters for the policy-gradient entry point.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    pub learning_rate: f64,
    /// Environment steps per rollout (one supervisor tick each).
    pub n_steps: usize,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub clip_range: f32,
    pub ent_coef: f32,
    pub vf_coef: f32,
    pub max_grad_norm: f32,
    pub hidden_size: usize,
}

impl Default for PpoConfig {
    fn default() -> Self {
        PpoConfig {
            learning_rate: 3e-4,
            n_steps: 2048,
            batch_size: 128,
            n_epochs: 10,
            gamma: 1.0,
            gae_lambda: 0.95,
            clip_range: 0.2,
            ent_coef: 0.01,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            hidden_size: 128,
        }
    }
}

impl PpoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::Validation("learning_rate must be > 0".into()));
        }
        if self.n_steps == 0 || self.batch_size == 0 || self.n_epochs == 0 {
            return Err(ConfigError::Validation(
                "n_steps, batch_size and n_epochs must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gamma) || !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(ConfigError::Validation(
                "gamma and gae_lambda must be in [0, 1]".into(),
            ));
        }
        if self.clip_range <= 0.0 || self.max_grad_norm <= 0.0 {
            return Err(ConfigError::Validation(
                "clip_range and max_grad_norm must be > 0".into(),
            ));
        }
        Ok(())
    }
}
