use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::TrainingError;

/// Key/value metric stream. Values recorded between two dumps form one record.
pub trait MetricLogger {
    fn record(&mut self, key: &str, value: f64);

    /// Flush the pending values as one record stamped with `step`.
    fn dump(&mut self, step: u64) -> Result<(), TrainingError>;
}

#[derive(Serialize)]
struct Line<'a> {
    step: u64,
    #[serde(flatten)]
    values: &'a BTreeMap<String, f64>,
}

/// Appends one JSON object per dump to `<log_dir>/progress.jsonl`.
pub struct JsonlLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    pending: BTreeMap<String, f64>,
}

impl JsonlLogger {
    pub fn create(log_dir: &Path) -> Result<Self, TrainingError> {
        let path = log_dir.join("progress.jsonl");
        let to_err = |source| TrainingError::MetricLog {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(log_dir).map_err(to_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(to_err)?;
        Ok(JsonlLogger {
            writer: BufWriter::new(file),
            path,
            pending: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricLogger for JsonlLogger {
    fn record(&mut self, key: &str, value: f64) {
        self.pending.insert(key.to_string(), value);
    }

    fn dump(&mut self, step: u64) -> Result<(), TrainingError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = serde_json::to_string(&Line {
            step,
            values: &self.pending,
        })
        .map_err(|e| TrainingError::MetricLog {
            path: self.path.clone(),
            source: e.into(),
        })?;
        writeln!(self.writer, "{line}")
            .and_then(|_| self.writer.flush())
            .map_err(|source| TrainingError::MetricLog {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(step, "{line}");
        self.pending.clear();
        Ok(())
    }
}

/// Keeps every dumped record in memory.
#[derive(Debug, Default)]
pub struct InMemoryLogger {
    pending: BTreeMap<String, f64>,
    records: Vec<(u64, BTreeMap<String, f64>)>,
}

impl InMemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[(u64, BTreeMap<String, f64>)] {
        &self.records
    }

    /// Values recorded since the last dump.
    pub fn pending(&self) -> &BTreeMap<String, f64> {
        &self.pending
    }
}

impl MetricLogger for InMemoryLogger {
    fn record(&mut self, key: &str, value: f64) {
        self.pending.insert(key.to_string(), value);
    }

    fn dump(&mut self, step: u64) -> Result<(), TrainingError> {
        if !self.pending.is_empty() {
            self.records.push((step, std::mem::take(&mut self.pending)));
        }
        Ok(())
    }
}
