use std::path::{Path, PathBuf};

use crate::types::PenumbraError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Store file not found at the configured path.
    #[error("store not found: {0}")]
    MissingStore(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Core storage error.
    #[error(transparent)]
    Core(#[from] PenumbraError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Report serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_store(path: impl AsRef<Path>) -> Self {
        AdminError::MissingStore(path.as_ref().to_path_buf())
    }
}
