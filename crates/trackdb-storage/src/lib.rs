#![warn(missing_docs)]

//! Storage for trackdb
//!
//! Storage strategies that read and write full snapshots of a database's record
//! set and transaction log (plain JSON or encrypted), and the cross-process lock
//! that keeps one writer per database file.

pub mod encrypted;
pub mod error;
pub mod json;
pub mod lock;
pub mod strategy;

// Re-export public API
pub use encrypted::EncryptedStorage;
pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;
pub use lock::{PathLock, DEFAULT_LOCK_TIMEOUT};
pub use strategy::{log_path_for, write_atomic, RawCollection, StorageStrategy};
