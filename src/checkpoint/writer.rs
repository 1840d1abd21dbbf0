use std::fs;
use std::path::{Path, PathBuf};

use crate::ai::SaveModel;
use crate::checkpoint::metadata::{PoolCheckpoint, RunIdentity};
use crate::error::CheckpointError;
use crate::pool::PoolSnapshot;

const POOL_SUFFIX: &str = "_pool.json";

/// One persisted checkpoint: the model saved under `stem` plus its pool file.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub stem: PathBuf,
    pub step_count: u64,
    pub pool_path: PathBuf,
}

/// Writes model and pool checkpoints under `<base>/<name_prefix>_<timestamp>/`.
pub struct CheckpointWriter {
    base: PathBuf,
    last_step: Option<u64>,
}

impl CheckpointWriter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        CheckpointWriter {
            base: base.into(),
            last_step: None,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create the base directory if it is missing. Safe to call repeatedly.
    pub fn ensure_base_dir(&self) -> Result<(), CheckpointError> {
        ensure_dir(&self.base)
    }

    pub fn run_dir(&self, run: &RunIdentity) -> PathBuf {
        self.base.join(run.dir_name())
    }

    /// `<run_dir>/<step>_steps`; the model recorder adds its own extension.
    pub fn stem(&self, run: &RunIdentity, step: u64) -> PathBuf {
        self.run_dir(run).join(format!("{step}_steps"))
    }

    pub fn write(
        &mut self,
        run: &RunIdentity,
        step: u64,
        model: &dyn SaveModel,
        snapshot: &PoolSnapshot,
    ) -> Result<CheckpointRecord, CheckpointError> {
        if let Some(last) = self.last_step {
            if step <= last {
                return Err(CheckpointError::StaleStep { step, last });
            }
        }
        ensure_dir(&self.run_dir(run))?;

        let stem = self.stem(run, step);
        let pool_path = pool_path(&stem);
        if pool_path.exists() {
            return Err(CheckpointError::AlreadyExists(pool_path));
        }

        model.save_model(&stem)?;

        let json = serde_json::to_string(&PoolCheckpoint::from(snapshot))?;
        let tmp = pool_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &pool_path)?;

        self.last_step = Some(step);
        tracing::debug!(step, path = %stem.display(), "checkpoint written");
        Ok(CheckpointRecord {
            stem,
            step_count: step,
            pool_path,
        })
    }

    /// Every checkpoint of `run`, ordered by step.
    pub fn list(&self, run: &RunIdentity) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let dir = self.run_dir(run);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(step) = name
                .to_str()
                .and_then(|n| n.strip_suffix(POOL_SUFFIX))
                .and_then(|n| n.strip_suffix("_steps"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            let stem = dir.join(format!("{step}_steps"));
            records.push(CheckpointRecord {
                pool_path: pool_path(&stem),
                stem,
                step_count: step,
            });
        }
        records.sort_by_key(|r| r.step_count);
        Ok(records)
    }

    pub fn latest(&self, run: &RunIdentity) -> Result<Option<CheckpointRecord>, CheckpointError> {
        Ok(self.list(run)?.pop())
    }

    /// Read the pool file written for `stem`.
    pub fn load_pool(stem: &Path) -> Result<PoolCheckpoint, CheckpointError> {
        let path = pool_path(stem);
        let text = fs::read_to_string(&path).map_err(|source| CheckpointError::PoolRead {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CheckpointError::PoolParse { path, source })
    }
}

fn pool_path(stem: &Path) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(POOL_SUFFIX);
    PathBuf::from(name)
}

fn ensure_dir(path: &Path) -> Result<(), CheckpointError> {
    if path.exists() && !path.is_dir() {
        return Err(CheckpointError::NotADirectory(path.to_path_buf()));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a marker file the way a recorder would.
    struct MarkerModel;

    impl SaveModel for MarkerModel {
        fn save_model(&self, stem: &Path) -> Result<(), CheckpointError> {
            let mut path = stem.as_os_str().to_owned();
            path.push(".mpk");
            fs::write(PathBuf::from(path), b"weights")?;
            Ok(())
        }
    }

    fn example_snapshot() -> PoolSnapshot {
        PoolSnapshot {
            size: 2,
            weights: vec![0.5, -0.3],
            expressions: vec!["Ref(Close,-5)".into(), "Feature(VOLUME)".into()],
            in_sample_metrics: vec![0.12, 0.08],
            best_ensemble_metric: 0.15,
            evaluation_count: 3,
        }
    }

    #[test]
    fn test_write_layout_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CheckpointWriter::new(dir.path().join("checkpoints"));
        writer.ensure_base_dir().unwrap();
        let run = RunIdentity::new("ppo_csi300_10_0", "20240101120000");

        let record = writer.write(&run, 2048, &MarkerModel, &example_snapshot()).unwrap();
        let run_dir = dir.path().join("checkpoints/ppo_csi300_10_0_20240101120000");
        assert_eq!(record.stem, run_dir.join("2048_steps"));
        assert!(run_dir.join("2048_steps.mpk").exists());
        assert!(run_dir.join("2048_steps_pool.json").exists());
        assert!(!run_dir.join("2048_steps_pool.json.tmp").exists());

        let pool = CheckpointWriter::load_pool(&record.stem).unwrap();
        assert_eq!(pool.weights, vec![0.5, -0.3]);
        assert_eq!(pool.exprs, vec!["Ref(Close,-5)", "Feature(VOLUME)"]);
        assert_eq!(pool.ics_ret, vec![0.12, 0.08]);
        assert_eq!(pool.best_ic_ret, 0.15);
    }

    #[test]
    fn test_steps_must_increase() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CheckpointWriter::new(dir.path());
        let run = RunIdentity::new("r", "t");
        writer.write(&run, 100, &MarkerModel, &example_snapshot()).unwrap();
        let err = writer.write(&run, 100, &MarkerModel, &example_snapshot()).unwrap_err();
        assert!(matches!(err, CheckpointError::StaleStep { step: 100, last: 100 }));
        writer.write(&run, 200, &MarkerModel, &example_snapshot()).unwrap();

        let steps: Vec<u64> = writer.list(&run).unwrap().iter().map(|r| r.step_count).collect();
        assert_eq!(steps, vec![100, 200]);
        assert_eq!(writer.latest(&run).unwrap().unwrap().step_count, 200);
    }

    #[test]
    fn test_never_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunIdentity::new("r", "t");
        let mut first = CheckpointWriter::new(dir.path());
        first.write(&run, 10, &MarkerModel, &example_snapshot()).unwrap();

        // a second writer has no step history, but the file on disk still protects it
        let mut second = CheckpointWriter::new(dir.path());
        let err = second.write(&run, 10, &MarkerModel, &example_snapshot()).unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyExists(_)));
    }

    #[test]
    fn test_base_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blocked");
        fs::write(&file, "x").unwrap();
        let writer = CheckpointWriter::new(&file);
        assert!(matches!(
            writer.ensure_base_dir(),
            Err(CheckpointError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_ensure_base_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::new(dir.path().join("a/b"));
        writer.ensure_base_dir().unwrap();
        writer.ensure_base_dir().unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn test_list_of_unknown_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::new(dir.path());
        assert!(writer.list(&RunIdentity::new("none", "0")).unwrap().is_empty());
        assert!(writer.latest(&RunIdentity::new("none", "0")).unwrap().is_none());
    }
}
