//! Error types for trackdb

use std::path::PathBuf;

use thiserror::Error;

/// Result type used across trackdb
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by the tracking model, the transaction log and the database
#[derive(Debug, Error)]
pub enum DbError {
    /// The database could not be opened (lock contention, version mismatch,
    /// failed migration, unreadable files)
    #[error("Cannot open database at {path}: {message}")]
    Creation { path: PathBuf, message: String },

    /// Nothing eligible to undo, or the revert itself failed
    #[error("Cannot undo: {0}")]
    CannotUndo(String),

    /// Nothing eligible to redo, or the revert itself failed
    #[error("Cannot redo: {0}")]
    CannotRedo(String),

    /// A field path could not be parsed or resolved
    #[error("Invalid field path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// The field is not declared in the object's schema
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// A value could not be converted to the field's declared type
    #[error("Cannot convert value for field '{field}': {message}")]
    Coercion { field: String, message: String },

    /// A record snapshot or membership change is malformed
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Positional access outside the collection
    #[error("Index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The database handle was disposed
    #[error("Database at {0} has been disposed")]
    Disposed(PathBuf),

    /// Storage layer failure
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Create a Creation error for the given path
    pub fn creation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Creation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a CannotUndo error
    pub fn cannot_undo(reason: impl Into<String>) -> Self {
        Self::CannotUndo(reason.into())
    }

    /// Create a CannotRedo error
    pub fn cannot_redo(reason: impl Into<String>) -> Self {
        Self::CannotRedo(reason.into())
    }

    /// Create an InvalidPath error
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidRecord error
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    /// Whether this error was raised while opening a database
    pub fn is_creation(&self) -> bool {
        matches!(self, Self::Creation { .. })
    }
}
