//! Run names and log directories. Every name is a pure function of its inputs so a
//! run can be located again from its command line and start time.

use std::path::{Path, PathBuf};

use crate::ai::QcmVariant;
use crate::config::QcmConfig;

/// `strftime` pattern of policy-gradient run timestamps.
pub const PPO_TIME_FORMAT: &str = "%Y%m%d%H%M%S";
/// `strftime` pattern of quantile run timestamps.
pub const QCM_TIME_FORMAT: &str = "%Y%m%d-%H%M";

/// `ppo_<instruments>_<pool>_<seed>`
pub fn ppo_run_name(instruments: &str, pool_capacity: usize, seed: u64) -> String {
    format!("ppo_{instruments}_{pool_capacity}_{seed}")
}

/// `<root>/ppo_logs/pool_<pool>/<name>-<timestamp>`
pub fn ppo_log_dir(root: &Path, pool_capacity: usize, run_name: &str, timestamp: &str) -> PathBuf {
    root.join("ppo_logs")
        .join(format!("pool_{pool_capacity}"))
        .join(format!("{run_name}-{timestamp}"))
}

/// `<model>_<pool>_<seed>`
pub fn qcm_run_name(variant: QcmVariant, pool_capacity: usize, seed: u64) -> String {
    format!("{}_{pool_capacity}_{seed}", variant.key())
}

/// `<root>/alpha_logs/pool_<pool>_QCM_<std_lam>/<model>-seed<seed>-<time>-N<N>-lr<lr>-per<per>-gamma<gamma>-step<n>`
///
/// Floats are rendered with `{:?}` so whole numbers keep their decimal point
/// (`1.0`, not `1`). The learning rate is `quantile_lr` for fqf and `lr` otherwise.
pub fn qcm_log_dir(
    root: &Path,
    variant: QcmVariant,
    pool_capacity: usize,
    seed: u64,
    std_lam: f64,
    timestamp: &str,
    config: &QcmConfig,
) -> PathBuf {
    let lr = match variant {
        QcmVariant::Fqf => config.quantile_lr,
        QcmVariant::Qrdqn | QcmVariant::Iqn => config.lr,
    };
    let lr = lr.map_or_else(|| "none".to_string(), |lr| format!("{lr:?}"));
    root.join("alpha_logs")
        .join(format!("pool_{pool_capacity}_QCM_{std_lam:?}"))
        .join(format!(
            "{}-seed{seed}-{timestamp}-N{}-lr{lr}-per{}-gamma{:?}-step{}",
            variant.key(),
            config.n_quantiles,
            config.use_per,
            config.gamma,
            config.multi_step,
        ))
}
