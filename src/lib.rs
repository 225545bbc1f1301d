//! Shared helpers for the cross-crate scenario tests and benchmarks

use tempfile::TempDir;
use trackdb::{DataBase, DbResult, Record};

/// A database in a fresh temp directory; the directory lives as long as the handle
pub struct TempDataBase<T: Record> {
    /// Open database
    pub db: DataBase<T>,
    _dir: TempDir,
}

impl<T: Record> TempDataBase<T> {
    /// Open `<temp>/<file_name>` with default settings
    pub fn open(file_name: &str) -> DbResult<Self> {
        let dir = tempfile::tempdir()?;
        let db = DataBase::open(dir.path().join(file_name))?;
        Ok(Self { db, _dir: dir })
    }
}

impl<T: Record> std::ops::Deref for TempDataBase<T> {
    type Target = DataBase<T>;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}
