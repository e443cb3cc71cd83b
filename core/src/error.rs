use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt segment {path:?}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("term extraction failed: {0}")]
    Extract(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("merge thread pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// A corrupt segment is skipped by the merger; everything else aborts the run.
    pub fn is_skippable(&self) -> bool {
        matches!(self, IndexError::CorruptSegment { .. })
    }
}
