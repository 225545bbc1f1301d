//! trackdb: an embedded object database with persistent undo/redo
//!
//! Records are tracked objects whose field writes are observed, logged as
//! reversible transactions and persisted together with the record set.
//!
//! ```no_run
//! use trackdb::{DataBase, DbResult};
//! # use trackdb::Record;
//! # fn demo<T: Record>(item: T) -> DbResult<()> {
//! let db = DataBase::<T>::open("data/items.db")?;
//! db.add(item)?;
//! db.undo()?;
//! db.redo()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod logging;
pub mod migration;

// Re-export public API
pub use config::{ConfigError, ConfigResult, DataBaseConfig, EnvOverrides, StorageKind};
pub use database::{DataBase, DataBaseBuilder};
pub use logging::init_tracing;
pub use migration::MigrationCallback;

pub use trackdb_core::{
    ChangeEvent, DbError, DbResult, Field, FieldPath, FieldSpec, FieldStore, HardwareFingerprint,
    Identifier, Owned, OwnedMap, Record, Schema, SetOptions, TrackedObject, TransactionKind,
    TransactionRecord,
};
pub use trackdb_storage::{EncryptedStorage, JsonStorage, StorageError, StorageStrategy};
