//! Error types for trackdb storage

use std::path::PathBuf;

use thiserror::Error;
use trackdb_core::DbError;

/// Errors raised while reading, writing or locking database files
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Encryption failed
    #[error("Encryption failed: {message}")]
    Encryption { message: String },

    /// Decryption failed (wrong key or corrupted file)
    #[error("Decryption failed for {path}: {message}")]
    Decryption { path: PathBuf, message: String },

    /// The file starts with a format version byte this build does not know
    #[error("Unsupported format version {version} in {path}")]
    UnsupportedFormat { path: PathBuf, version: u8 },

    /// The file is shorter than its header
    #[error("Truncated file {path}: {len} bytes")]
    Truncated { path: PathBuf, len: usize },

    /// Another handle holds the lock for this path
    #[error("Timed out after {timeout_ms}ms waiting for the lock on {path}")]
    LockTimeout { path: PathBuf, timeout_ms: u64 },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Create an Encryption error
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Create a Decryption error for the given file
    pub fn decryption(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Decryption {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<StorageError> for DbError {
    fn from(err: StorageError) -> Self {
        DbError::Storage(Box::new(err))
    }
}
