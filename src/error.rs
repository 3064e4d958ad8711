//! Global error handling for nerdstore
//!
//! This module provides a centralized error type that can represent errors
//! from all modules in the project.

use std::io;
use thiserror::Error;

use crate::fm::FileManagerError;

/// Global error type for nerdstore operations
#[derive(Error, Debug)]
pub enum NerdStoreError {
    /// An id, path or list position could not be resolved
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    /// A mutation was attempted on a resource that has been deleted
    #[error("Resource {id} has been deleted; unable to {op}")]
    RecordDeleted { id: String, op: String },

    /// The operation would throw away the contents of a non-empty folder
    #[error("Not allowed to remove collection {path}: {reason}")]
    CollectionRemovalDisallowed { path: String, reason: String },

    /// Persisted data is unreadable or has an unexpected shape
    #[error("Storage format error: {0}")]
    StorageFormat(String),

    /// Two conflicting claims on the same identifier
    #[error("Identifier mismatch: {requested} conflicts with {current}")]
    MismatchedIdentifier { requested: String, current: String },

    /// A new file component was given without a file path
    #[error("File path not specified for new file component")]
    FilepathNotSpecified,

    /// File manager errors
    #[error("File manager error: {0}")]
    FileManager(#[from] FileManagerError),

    /// Errors reported while talking to the file manager
    #[error("Remote storage error: {0}")]
    RemoteStorage(String),

    /// File system errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON processing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regular expression errors
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Generic storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A local invariant was violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NerdStoreError {
    /// Shorthand for [`NerdStoreError::ObjectNotFound`]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::ObjectNotFound { key: key.into() }
    }

    /// Shorthand for [`NerdStoreError::RecordDeleted`]
    pub fn deleted(id: impl Into<String>, op: impl Into<String>) -> Self {
        Self::RecordDeleted {
            id: id.into(),
            op: op.into(),
        }
    }

    /// Shorthand for [`NerdStoreError::CollectionRemovalDisallowed`]
    pub fn removal_disallowed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollectionRemovalDisallowed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for lookup misses
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

/// Specialized Result type for nerdstore operations
pub type Result<T> = std::result::Result<T, NerdStoreError>;

/// Creates a NerdStoreError with a formatted message
#[macro_export]
macro_rules! error {
    ($error_type:ident, $($arg:tt)*) => {
        $crate::error::NerdStoreError::$error_type(format!($($arg)*))
    };
}

/// Returns an error result with a formatted message
#[macro_export]
macro_rules! bail {
    ($error_type:ident, $($arg:tt)*) => {
        return Err($crate::error!($error_type, $($arg)*))
    };
}

/// Ensures a condition is true, otherwise returns an error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $error_type:ident, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($error_type, $($arg)*)
        }
    };
}

/// Extension trait for adding context to errors
pub trait ResultExt<T, E> {
    /// Add additional context to an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E: std::error::Error + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        self.map_err(|e| {
            let context = f();
            NerdStoreError::StorageFormat(format!("{}: {}", context, e))
        })
    }
}

// Lets tests and the CLI bubble store errors through io::Result
impl From<NerdStoreError> for io::Error {
    fn from(err: NerdStoreError) -> Self {
        match err {
            NerdStoreError::Io(e) => e,
            NerdStoreError::ObjectNotFound { .. } => {
                io::Error::new(io::ErrorKind::NotFound, err.to_string())
            }
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_positive(n: i64) -> Result<i64> {
        crate::ensure!(n > 0, InvalidArgument, "expected a positive number, got {}", n);
        Ok(n)
    }

    #[test]
    fn test_macros_build_variants() {
        assert_eq!(check_positive(3).ok(), Some(3));
        let err = check_positive(-1).unwrap_err();
        assert!(matches!(err, NerdStoreError::InvalidArgument(_)));
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn test_not_found_maps_to_io_kind() {
        let err: io::Error = NerdStoreError::not_found("f1").into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(NerdStoreError::not_found("x").is_not_found());
        assert!(!NerdStoreError::deleted("nrd:0001", "update").is_not_found());
    }

    #[test]
    fn test_with_context_marks_storage_format() {
        let parsed: std::result::Result<u32, _> = "abc".parse::<u32>();
        let err = parsed.with_context(|| "reading _seq.json").unwrap_err();
        assert!(matches!(err, NerdStoreError::StorageFormat(_)));
        assert!(err.to_string().contains("_seq.json"));
    }
}
