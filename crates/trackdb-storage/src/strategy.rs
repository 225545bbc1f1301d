//! Storage strategy contract
//!
//! A strategy turns full snapshots of the record set and of the transaction log
//! into file contents and back. Every save rewrites the whole file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use trackdb_core::RawRecord;

use crate::error::StorageResult;

/// Raw snapshot of a record collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCollection {
    /// Format version the items were written with
    pub version: u32,
    /// Raw item snapshots, in collection order
    #[serde(default)]
    pub items: Vec<Value>,
}

impl RawCollection {
    /// Create a snapshot
    pub fn new(version: u32, items: Vec<Value>) -> Self {
        Self { version, items }
    }
}

/// Persistence collaborator of a database
pub trait StorageStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Turn serialized JSON into file contents
    fn encode(&self, plain: &[u8]) -> StorageResult<Vec<u8>>;

    /// Turn file contents back into serialized JSON
    fn decode(&self, path: &Path, stored: &[u8]) -> StorageResult<Vec<u8>>;

    /// Read and decode a file; absent and empty files read as `None`
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        if !path.exists() {
            return Ok(None);
        }
        let stored = std::fs::read(path)?;
        if stored.is_empty() {
            debug!("{} is empty, treating as absent", path.display());
            return Ok(None);
        }
        self.decode(path, &stored).map(Some)
    }

    /// Encode and atomically rewrite a file
    fn write(&self, path: &Path, plain: &[u8]) -> StorageResult<()> {
        let stored = self.encode(plain)?;
        write_atomic(path, &stored)
    }

    /// Load the collection snapshot, `None` when there is none yet
    fn load_collection(&self, path: &Path) -> StorageResult<Option<RawCollection>> {
        match self.read(path)? {
            Some(plain) => {
                let collection: RawCollection = serde_json::from_slice(&plain)?;
                debug!(
                    "Loaded {} items (version {}) from {} via {}",
                    collection.items.len(),
                    collection.version,
                    path.display(),
                    self.name()
                );
                Ok(Some(collection))
            }
            None => Ok(None),
        }
    }

    /// Rewrite the collection snapshot
    fn save_collection(&self, path: &Path, collection: &RawCollection) -> StorageResult<()> {
        let plain = serde_json::to_vec_pretty(collection)?;
        self.write(path, &plain)?;
        debug!("Saved {} items to {}", collection.items.len(), path.display());
        Ok(())
    }

    /// Load the transaction log, newest first; empty when absent
    fn load_log(&self, path: &Path) -> StorageResult<Vec<RawRecord>> {
        match self.read(path)? {
            Some(plain) => Ok(serde_json::from_slice(&plain)?),
            None => Ok(Vec::new()),
        }
    }

    /// Rewrite the transaction log
    fn save_log(&self, path: &Path, records: &[RawRecord]) -> StorageResult<()> {
        let plain = serde_json::to_vec_pretty(records)?;
        self.write(path, &plain)?;
        debug!("Saved {} log records to {}", records.len(), path.display());
        Ok(())
    }

    /// Hook invoked when a database bridges stored data to a newer version
    fn migrate(&self, old_version: u32, new_version: u32) -> StorageResult<()> {
        info!(
            "{} storage migrating from version {} to {}",
            self.name(),
            old_version,
            new_version
        );
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over the target
pub fn write_atomic(path: &Path, contents: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Transaction log file that belongs to the collection file at `path`
///
/// `data/contacts.db` keeps its log in `data/transactions_contacts.data`.
pub fn log_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("transactions_{}.data", stem))
}
