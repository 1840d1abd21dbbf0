use std::path::PathBuf;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint path {0} exists and is not a directory")]
    NotADirectory(PathBuf),

    #[error("checkpoint step {step} does not advance past step {last}")]
    StaleStep { step: u64, last: u64 },

    #[error("checkpoint {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("failed to read pool snapshot from {path}: {source}")]
    PoolRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse pool snapshot from {path}: {source}")]
    PoolParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to save model: {0}")]
    ModelSave(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when market data cannot serve a request.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("no data for instrument universe '{instrument}' at {path}")]
    MissingSource { instrument: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed row {line} in {path}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no trading days for '{instrument}' between {start} and {end}")]
    EmptyRange {
        instrument: String,
        start: String,
        end: String,
    },

    #[error("expression reads day offset {offset}, outside the loaded range [{min}, {max})")]
    OutOfRange { offset: isize, min: isize, max: isize },

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("panel shape mismatch: {0}")]
    Shape(String),
}

/// Errors raised while assembling an expression from tokens.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("token {0} is not valid in the current builder state")]
    InvalidToken(String),

    #[error("expression is incomplete: stack holds {0} items")]
    Incomplete(usize),
}

/// Errors that can occur during training.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("agent selected masked action {action}")]
    IllegalAction { action: usize },

    #[error("failed to write metric log {path}: {source}")]
    MetricLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("unknown model '{key}' (expected one of: {known})")]
    UnknownVariant { key: String, known: String },
}
