//! Error taxonomy for the file history engine.
//!
//! Not-found is benign almost everywhere in this engine: a missing
//! snapshot or listing file means "no history yet", never a failure.
//! Callers use [`HistoryError::is_not_found`] to classify before
//! deciding whether to log.

use std::io::ErrorKind;
use std::path::PathBuf;

/// Errors produced by history model and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("resource is not backed by a file provider: {0}")]
    InvalidResource(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HistoryError {
    /// Whether this error means the target simply does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
