//! Crate-wide error type.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ContagionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dimension mismatch: expected {expected} institutions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("failed to persist histogram to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize histogram: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("run cancelled after {completed} of {requested} trials")]
    Cancelled { completed: u64, requested: u64 },
}

pub type Result<T> = std::result::Result<T, ContagionError>;

pub(crate) fn invalid(msg: impl Into<String>) -> ContagionError {
    ContagionError::InvalidConfig(msg.into())
}
