//! The collection engine
//!
//! A [`DataBase`] owns an ordered set of tracked records backed by a snapshot
//! file and a transaction log file. Every structural change and every undoable
//! field edit on a live record is logged and both files are rewritten before
//! the call returns.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use trackdb_core::{
    critical_section, ChangeEvent, DbError, DbResult, DeferredEvents, FieldChange, Identifier,
    ItemListener, LiveSet, Record, TransactionLog, TransactionRecord, UndoRedo,
};
use trackdb_storage::{log_path_for, PathLock, RawCollection, StorageStrategy};

use crate::config::DataBaseConfig;
use crate::migration::{self, MigrationCallback};

struct DbState<T: Record> {
    live: LiveSet<T>,
    log: TransactionLog<T>,
    lock: Option<PathLock>,
    disposed: bool,
}

struct Shared<T: Record> {
    path: PathBuf,
    log_path: PathBuf,
    config: DataBaseConfig,
    storage: Arc<dyn StorageStrategy>,
    state: Mutex<DbState<T>>,
}

impl<T: Record> Shared<T> {
    fn state(&self) -> DbResult<MutexGuard<'_, DbState<T>>> {
        let state = self.state.lock();
        if state.disposed {
            return Err(DbError::Disposed(self.path.clone()));
        }
        Ok(state)
    }

    /// Rewrite the snapshot and the log
    fn persist(&self, state: &DbState<T>) -> DbResult<()> {
        let items = state.live.items().iter().map(|item| item.to_raw()).collect();
        let collection = RawCollection::new(self.config.version, items);
        if let Err(e) = self.storage.save_collection(&self.path, &collection) {
            error!("Failed to save {}: {}", self.path.display(), e);
            return Err(e.into());
        }
        if let Err(e) = self.storage.save_log(&self.log_path, &state.log.to_raw()) {
            error!("Failed to save {}: {}", self.log_path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }

    fn record_modify(&self, id: Identifier, event: &ChangeEvent) -> DbResult<()> {
        let _section = critical_section();
        let mut state = self.state()?;
        debug!("Item {} changed {}: {} -> {}", id, event.field, event.old_value, event.new_value);
        state.log.prepend(TransactionRecord::modified(
            id,
            FieldChange {
                path: event.field.clone(),
                old_value: event.old_value.clone(),
                new_value: event.new_value.clone(),
            },
        ));
        self.persist(&state)
    }

    fn dispose(&self) {
        let _section = critical_section();
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.live.clear();
        state.log = TransactionLog::new();
        if let Some(mut lock) = state.lock.take() {
            lock.release();
        }
        info!("Disposed database at {}", self.path.display());
    }
}

fn item_listener<T: Record>(shared: Weak<Shared<T>>) -> ItemListener {
    Arc::new(move |id: Identifier, event: &ChangeEvent| {
        // Reverts write through non-undoable events
        if !event.undoable {
            return Ok(());
        }
        match shared.upgrade() {
            Some(shared) => shared.record_modify(id, event),
            None => Ok(()),
        }
    })
}

/// Options for opening a [`DataBase`]
pub struct DataBaseBuilder<T: Record> {
    path: PathBuf,
    config: DataBaseConfig,
    storage: Option<Arc<dyn StorageStrategy>>,
    migration: Option<MigrationCallback>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Record> DataBaseBuilder<T> {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            config: DataBaseConfig::default(),
            storage: None,
            migration: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Use a specific configuration
    pub fn config(mut self, config: DataBaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a storage strategy instead of the one named by the config
    pub fn storage(mut self, storage: impl StorageStrategy + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Use a shared storage strategy
    pub fn storage_arc(mut self, storage: Arc<dyn StorageStrategy>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Rewrite items stored at an older version while opening
    pub fn migration<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, u32, Vec<serde_json::Value>) -> DbResult<Vec<serde_json::Value>> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(callback));
        self
    }

    /// Lock the path and load the database
    pub fn open(self) -> DbResult<DataBase<T>> {
        let Self {
            path,
            config,
            storage,
            migration,
            ..
        } = self;
        config
            .validate()
            .map_err(|e| DbError::creation(&path, e.to_string()))?;

        let path = canonical_path(&path)?;
        let lock = PathLock::acquire(&path, config.lock_timeout())
            .map_err(|e| DbError::creation(&path, e.to_string()))?;
        // Taken after the path lock so waiting on another handle does not stall other databases
        let _section = critical_section();

        let storage = storage.unwrap_or_else(|| config.storage.strategy());
        let log_path = log_path_for(&path);

        let raw_log = storage
            .load_log(&log_path)
            .map_err(|e| DbError::creation(&log_path, e.to_string()))?;
        let log = TransactionLog::<T>::from_raw(raw_log)
            .map_err(|e| DbError::creation(&log_path, e.to_string()))?;

        let raw_items = match storage
            .load_collection(&path)
            .map_err(|e| DbError::creation(&path, e.to_string()))?
        {
            Some(stored) => migration::reconcile(&path, stored, &config, migration.as_ref(), storage.as_ref())?,
            None => Vec::new(),
        };
        let items = raw_items
            .iter()
            .map(T::from_raw)
            .collect::<DbResult<Vec<T>>>()
            .map_err(|e| DbError::creation(&path, e.to_string()))?;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared<T>>| Shared {
            path: path.clone(),
            log_path,
            config,
            storage,
            state: Mutex::new(DbState {
                live: LiveSet::with_listener(item_listener(weak.clone())),
                log,
                lock: Some(lock),
                disposed: false,
            }),
        });

        {
            let mut guard = shared.state.lock();
            let state = &mut *guard;
            for item in items {
                state
                    .live
                    .push(Arc::new(item))
                    .map_err(|e| DbError::creation(&path, e.to_string()))?;
            }
            state.log.relink(&state.live);
            info!(
                "Opened database at {} with {} items and {} log records via {} storage",
                path.display(),
                state.live.len(),
                state.log.len(),
                shared.storage.name()
            );
        }

        Ok(DataBase { shared })
    }
}

/// Resolve the parent directory, creating it when missing
fn canonical_path(path: &Path) -> DbResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| DbError::creation(path, "path has no file name"))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| DbError::creation(path, e.to_string()))?;
    let parent = parent
        .canonicalize()
        .map_err(|e| DbError::creation(path, e.to_string()))?;
    Ok(parent.join(file_name))
}

/// A persistent, undoable collection of records
pub struct DataBase<T: Record> {
    shared: Arc<Shared<T>>,
}

impl<T: Record> DataBase<T> {
    /// Open with default settings
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::builder(path).open()
    }

    /// Start configuring a database at `path`
    pub fn builder(path: impl AsRef<Path>) -> DataBaseBuilder<T> {
        DataBaseBuilder::new(path.as_ref().to_path_buf())
    }

    /// Canonical snapshot path
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Transaction log path
    pub fn log_path(&self) -> &Path {
        &self.shared.log_path
    }

    /// Settings the database was opened with
    pub fn config(&self) -> &DataBaseConfig {
        &self.shared.config
    }

    /// Append an item
    pub fn add(&self, item: T) -> DbResult<Arc<T>> {
        self.add_shared(Arc::new(item))
    }

    /// Append an already shared item
    pub fn add_shared(&self, item: Arc<T>) -> DbResult<Arc<T>> {
        let _section = critical_section();
        let mut state = self.shared.state()?;
        let len = state.live.len();
        self.insert_locked(&mut state, len, item)
    }

    /// Insert an item at `index`, clamped to the length
    pub fn insert(&self, index: usize, item: T) -> DbResult<Arc<T>> {
        let _section = critical_section();
        let mut state = self.shared.state()?;
        self.insert_locked(&mut state, index, Arc::new(item))
    }

    fn insert_locked(&self, state: &mut DbState<T>, index: usize, item: Arc<T>) -> DbResult<Arc<T>> {
        let index = state.live.insert(index, Arc::clone(&item))?;
        state.log.prepend(TransactionRecord::added(Arc::clone(&item), index));
        self.shared.persist(state)?;
        info!("Added item {} at {}", item.identifier(), index);
        Ok(item)
    }

    /// Remove an item; `false` when it is not in the collection
    pub fn remove(&self, item: &T) -> DbResult<bool> {
        self.remove_by_id(item.identifier())
    }

    /// Remove the item with `id`; `false` when there is none
    pub fn remove_by_id(&self, id: Identifier) -> DbResult<bool> {
        let _section = critical_section();
        let mut state = self.shared.state()?;
        match state.live.remove(id) {
            Some((index, item)) => {
                self.log_delete(&mut state, item, index)?;
                Ok(true)
            }
            None => {
                debug!("Item {} not in {}, nothing removed", id, self.shared.path.display());
                Ok(false)
            }
        }
    }

    /// Remove and return the item at `index`
    pub fn remove_at(&self, index: usize) -> DbResult<Arc<T>> {
        let _section = critical_section();
        let mut state = self.shared.state()?;
        self.remove_at_locked(&mut state, index)
    }

    fn remove_at_locked(&self, state: &mut DbState<T>, index: usize) -> DbResult<Arc<T>> {
        let item = state.live.remove_at(index)?;
        self.log_delete(state, Arc::clone(&item), index)?;
        Ok(item)
    }

    fn log_delete(&self, state: &mut DbState<T>, item: Arc<T>, index: usize) -> DbResult<()> {
        let id = item.identifier();
        state.log.prepend(TransactionRecord::deleted(item, index));
        self.shared.persist(state)?;
        info!("Removed item {} from {}", id, index);
        Ok(())
    }

    /// Remove every item, logging one delete per item; returns how many
    pub fn clear(&self) -> DbResult<usize> {
        let _section = critical_section();
        let mut state = self.shared.state()?;
        let mut removed = 0;
        while !state.live.is_empty() {
            self.remove_at_locked(&mut state, 0)?;
            removed += 1;
        }
        info!("Cleared {} items from {}", removed, self.shared.path.display());
        Ok(removed)
    }

    /// Replace the item at `index`, returning the replaced one
    pub fn set_at(&self, index: usize, item: T) -> DbResult<Arc<T>> {
        let _section = critical_section();
        let mut state = self.shared.state()?;
        let replaced = self.remove_at_locked(&mut state, index)?;
        self.insert_locked(&mut state, index, Arc::new(item))?;
        Ok(replaced)
    }

    /// Revert the most recent undoable change
    pub fn undo(&self) -> DbResult<()> {
        let _section = critical_section();
        let deferred = DeferredEvents::begin();
        {
            let mut guard = self.shared.state()?;
            let state = &mut *guard;
            if let Err(e) = UndoRedo::undo(&mut state.log, &mut state.live) {
                warn!("Undo failed on {}: {}", self.shared.path.display(), e);
                return Err(e);
            }
            self.shared.persist(state)?;
        }
        info!("Undo on {}", self.shared.path.display());
        // Observers run once the state is unlocked, so they may read the database
        deferred.deliver()
    }

    /// Re-apply the most recently undone change
    pub fn redo(&self) -> DbResult<()> {
        let _section = critical_section();
        let deferred = DeferredEvents::begin();
        {
            let mut guard = self.shared.state()?;
            let state = &mut *guard;
            if let Err(e) = UndoRedo::redo(&mut state.log, &mut state.live) {
                warn!("Redo failed on {}: {}", self.shared.path.display(), e);
                return Err(e);
            }
            self.shared.persist(state)?;
        }
        info!("Redo on {}", self.shared.path.display());
        // Observers run once the state is unlocked, so they may read the database
        deferred.deliver()
    }

    /// Whether [`undo`](Self::undo) has something to revert
    pub fn can_undo(&self) -> bool {
        let state = self.shared.state.lock();
        !state.disposed && UndoRedo::can_undo(&state.log)
    }

    /// Whether [`redo`](Self::redo) has something to re-apply
    pub fn can_redo(&self) -> bool {
        let state = self.shared.state.lock();
        !state.disposed && UndoRedo::can_redo(&state.log)
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.shared.state.lock().live.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().live.is_empty()
    }

    /// Item at `index`
    pub fn get(&self, index: usize) -> Option<Arc<T>> {
        self.shared.state.lock().live.get(index)
    }

    /// Item with `id`
    pub fn find(&self, id: Identifier) -> Option<Arc<T>> {
        self.shared.state.lock().live.find(id)
    }

    /// Whether an item with `id` is in the collection
    pub fn contains(&self, id: Identifier) -> bool {
        self.shared.state.lock().live.contains(id)
    }

    /// Snapshot of the items in order
    pub fn items(&self) -> Vec<Arc<T>> {
        self.shared.state.lock().live.items()
    }

    /// Iterate over a snapshot of the items
    pub fn iter(&self) -> std::vec::IntoIter<Arc<T>> {
        self.items().into_iter()
    }

    /// The whole transaction log, newest first
    pub fn history(&self) -> Vec<TransactionRecord<T>> {
        self.shared.state.lock().log.iter().cloned().collect()
    }

    /// A page of the transaction log, newest first
    pub fn history_page(&self, limit: usize, offset: usize) -> Vec<TransactionRecord<T>> {
        self.shared
            .state
            .lock()
            .log
            .history(limit, offset)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Log records touching the item with `id`, newest first
    pub fn history_for(&self, id: Identifier) -> Vec<TransactionRecord<T>> {
        self.shared
            .state
            .lock()
            .log
            .records_for_item(id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Whether [`dispose`](Self::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }

    /// Detach every item, drop in-memory state and release the lock
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

impl<T: Record> Drop for DataBase<T> {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl<'a, T: Record> IntoIterator for &'a DataBase<T> {
    type Item = Arc<T>;
    type IntoIter = std::vec::IntoIter<Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Record> std::fmt::Debug for DataBase<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DataBase")
            .field("path", &self.shared.path)
            .field("storage", &self.shared.storage.name())
            .field("items", &state.live.len())
            .field("log", &state.log.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use trackdb_core::fixtures::Contact;
    use trackdb_core::{RawRecord, TrackedObject, TransactionKind};
    use trackdb_storage::{JsonStorage, StorageResult};

    fn kinds(db: &DataBase<Contact>) -> Vec<TransactionKind> {
        db.history().iter().map(|record| record.kind()).collect()
    }

    #[test]
    fn test_fresh_database_has_no_history() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("fresh.db")).unwrap();

        assert!(db.is_empty());
        assert!(!db.can_undo());
        assert!(!db.can_redo());
        assert!(matches!(db.undo(), Err(DbError::CannotUndo(_))));
        assert!(matches!(db.redo(), Err(DbError::CannotRedo(_))));
    }

    #[test]
    fn test_add_then_undo_then_redo() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("people.db")).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();
        let id = ada.identifier();

        db.undo().unwrap();
        assert!(db.is_empty());
        assert!(!db.can_undo());
        assert!(db.can_redo());

        db.redo().unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(0).unwrap().identifier(), id);
        assert!(db.can_undo());
        assert!(!db.can_redo());
    }

    #[test]
    fn test_field_edits_are_logged_and_undone() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("edits.db")).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();

        ada.set_name("Ada L").unwrap();
        ada.set_age(36).unwrap();
        assert_eq!(kinds(&db), vec![TransactionKind::Modify, TransactionKind::Modify, TransactionKind::Add]);

        db.undo().unwrap();
        db.undo().unwrap();
        assert_eq!(ada.name(), "Ada");
        assert_eq!(ada.age(), 0);

        db.redo().unwrap();
        assert_eq!(ada.name(), "Ada L");
    }

    /// JSON storage that counts snapshot and log saves
    struct CountingStorage {
        inner: JsonStorage,
        saves: Arc<AtomicUsize>,
    }

    impl StorageStrategy for CountingStorage {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn encode(&self, plain: &[u8]) -> StorageResult<Vec<u8>> {
            self.inner.encode(plain)
        }

        fn decode(&self, path: &Path, stored: &[u8]) -> StorageResult<Vec<u8>> {
            self.inner.decode(path, stored)
        }

        fn save_collection(&self, path: &Path, collection: &RawCollection) -> StorageResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_collection(path, collection)
        }

        fn save_log(&self, path: &Path, records: &[RawRecord]) -> StorageResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_log(path, records)
        }
    }

    #[test]
    fn test_idempotent_and_untracked_writes_are_not_logged() {
        let dir = tempdir().unwrap();
        let saves = Arc::new(AtomicUsize::new(0));
        let db = DataBase::<Contact>::builder(dir.path().join("quiet.db"))
            .storage(CountingStorage {
                inner: JsonStorage::new(),
                saves: Arc::clone(&saves),
            })
            .open()
            .unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), 2);

        assert!(!ada.set_name("Ada").unwrap());
        assert!(ada.set_age_untracked(7).unwrap());

        assert_eq!(db.history().len(), 1);
        assert_eq!(saves.load(Ordering::SeqCst), 2);
        assert_eq!(ada.age(), 7);

        // A tracked edit saves both files again
        ada.set_age(8).unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("dup.db")).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();

        assert!(db.add_shared(Arc::clone(&ada)).is_err());
        assert_eq!(db.len(), 1);
        assert_eq!(db.history().len(), 1);
    }

    #[test]
    fn test_remove_absent_logs_nothing() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("absent.db")).unwrap();
        let stranger = Contact::new("Nobody");

        assert!(!db.remove(&stranger).unwrap());
        assert!(db.history().is_empty());
        assert!(matches!(db.remove_at(0), Err(DbError::IndexOutOfRange { index: 0, len: 0 })));
    }

    #[test]
    fn test_undo_delete_restores_position() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("order.db")).unwrap();
        for name in ["a", "b", "c"] {
            db.add(Contact::new(name)).unwrap();
        }

        let removed = db.remove_at(1).unwrap();
        assert_eq!(removed.name(), "b");
        db.undo().unwrap();

        let names: Vec<String> = db.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_insert_and_iterate_by_reference() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("insert.db")).unwrap();
        db.add(Contact::new("b")).unwrap();
        db.insert(0, Contact::new("a")).unwrap();
        db.insert(99, Contact::new("c")).unwrap();

        let mut names = Vec::new();
        for contact in &db {
            names.push(contact.name());
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(db.history()[1].index(), Some(0));
        assert_eq!(db.history()[0].index(), Some(2));
    }

    #[test]
    fn test_dispose_is_idempotent_and_blocks_mutation() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("gone.db")).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();

        db.dispose();
        db.dispose();

        assert!(db.is_disposed());
        assert!(db.is_empty());
        assert!(!db.can_undo());
        assert!(matches!(db.add(Contact::new("Bob")), Err(DbError::Disposed(_))));
        assert!(matches!(db.undo(), Err(DbError::Disposed(_))));

        // Detached items no longer log
        ada.set_name("Changed").unwrap();
        let reopened = DataBase::<Contact>::open(dir.path().join("gone.db")).unwrap();
        assert_eq!(reopened.history().len(), 1);
    }

    #[test]
    fn test_history_pages_and_per_item_records() {
        let dir = tempdir().unwrap();
        let db = DataBase::<Contact>::open(dir.path().join("pages.db")).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();
        let bob = db.add(Contact::new("Bob")).unwrap();
        ada.set_age(1).unwrap();
        bob.set_age(2).unwrap();

        let page = db.history_page(2, 1);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].item_id(), ada.identifier());
        assert_eq!(page[1].kind(), TransactionKind::Add);

        let for_ada = db.history_for(ada.identifier());
        assert_eq!(for_ada.len(), 2);
        assert!(for_ada.iter().all(|record| record.item_id() == ada.identifier()));
    }

    #[test]
    fn test_invalid_config_fails_open() {
        let dir = tempdir().unwrap();
        let config = DataBaseConfig {
            version: 1,
            min_compatible_version: 2,
            ..DataBaseConfig::default()
        };
        let result = DataBase::<Contact>::builder(dir.path().join("bad.db"))
            .config(config)
            .open();
        assert!(result.unwrap_err().is_creation());
    }

    #[test]
    fn test_path_without_file_name_fails_open() {
        let result = DataBase::<Contact>::open("/");
        assert!(result.unwrap_err().is_creation());
    }
}
