//! Cross-process exclusive locks keyed by canonical path
//!
//! A lock is an OS-level exclusive lock on a file in the system temp directory
//! whose name is derived from the locked path. Handles in the same process are
//! tracked in a registry as well, since OS file locks do not always exclude a
//! second handle opened by the owning process.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Default bound on lock acquisition
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Paths locked by this process
static HELD: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive lock on a path, released on drop
pub struct PathLock {
    path: PathBuf,
    lock_file: PathBuf,
    file: Option<File>,
}

impl PathLock {
    /// Lock file used for `path`
    pub fn lock_file_for(path: &Path) -> PathBuf {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        std::env::temp_dir().join(format!("trackdb-{}.lock", &hex::encode(digest)[..32]))
    }

    /// Acquire the lock, polling until `timeout` elapses
    pub fn acquire(path: &Path, timeout: Duration) -> StorageResult<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("Lock on {} not acquired within {:?}", path.display(), timeout);
                return Err(StorageError::LockTimeout {
                    path: path.to_path_buf(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Acquire the lock if it is free right now
    pub fn try_acquire(path: &Path) -> StorageResult<Option<Self>> {
        // The registry stays locked until the OS lock is settled
        let mut held = HELD.lock();
        if held.contains(path) {
            return Ok(None);
        }

        let lock_file = Self::lock_file_for(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_file)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        held.insert(path.to_path_buf());
        debug!("Locked {} via {}", path.display(), lock_file.display());
        Ok(Some(Self {
            path: path.to_path_buf(),
            lock_file,
            file: Some(file),
        }))
    }

    /// Locked path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backing lock file
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Whether the lock is still held
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock; later calls do nothing
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                warn!("Failed to unlock {}: {}", self.lock_file.display(), e);
            }
            HELD.lock().remove(&self.path);
            debug!("Released lock on {}", self.path.display());
        }
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PathLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLock")
            .field("path", &self.path)
            .field("held", &self.is_held())
            .finish()
    }
}
