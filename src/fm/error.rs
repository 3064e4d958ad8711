//! Error types for file manager and scanning operations

use std::io;
use thiserror::Error;

/// Result type for file manager operations
pub type FmResult<T> = Result<T, FileManagerError>;

/// Errors raised by a file manager or a scan of one of its spaces
#[derive(Error, Debug)]
pub enum FileManagerError {
    /// A scan could not be carried out
    #[error("Scan of space {space_id} failed: {message}")]
    Scan { space_id: String, message: String },

    /// A scan is already running for the space
    #[error("A scan is already in progress for space {0}")]
    ScanInProgress(String),

    /// The request was not acceptable
    #[error("Bad file manager request: {0}")]
    Client(String),

    /// Unknown space, scan or file
    #[error("Not found: {0}")]
    ResourceNotFound(String),

    /// A scan was asked to move to a phase it cannot reach
    #[error("Invalid scan transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// The scan was cancelled before it finished
    #[error("Scan {0} was cancelled")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FileManagerError {
    pub fn scan(space_id: impl Into<String>, message: impl Into<String>) -> Self {
        FileManagerError::Scan {
            space_id: space_id.into(),
            message: message.into(),
        }
    }
}

impl From<FileManagerError> for io::Error {
    fn from(err: FileManagerError) -> Self {
        match err {
            FileManagerError::Io(e) => e,
            FileManagerError::ResourceNotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
