//! Reopening databases: snapshots, logs, versions and migrations

use serde_json::{json, Value};
use tempfile::tempdir;
use trackdb::{DataBase, DataBaseConfig, DbError, DbResult, TrackedObject, TransactionKind};
use trackdb_core::fixtures::{Contact, Phone, Status};

fn config(version: u32, min_compatible_version: u32) -> DataBaseConfig {
    DataBaseConfig {
        version,
        min_compatible_version,
        ..DataBaseConfig::default()
    }
}

#[test]
fn test_reopen_restores_items_and_history() {
    trackdb::init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("contacts.db");

    let id = {
        let db = DataBase::<Contact>::open(&path).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();
        ada.set_age(36).unwrap();
        ada.set_status(Status::Away).unwrap();
        ada.phones().insert("home".to_string(), Phone::new("555-0100"));
        ada.address().set_city("London").unwrap();
        ada.identifier()
    };

    let db = DataBase::<Contact>::open(&path).unwrap();
    let ada = db.find(id).unwrap();
    assert_eq!(ada.name(), "Ada");
    assert_eq!(ada.age(), 36);
    assert_eq!(ada.status(), Status::Away);
    assert_eq!(ada.address().city(), "London");
    assert_eq!(ada.phones().get(&"home".to_string()).unwrap().number(), "555-0100");

    let kinds: Vec<TransactionKind> = db.history().iter().map(|r| r.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::Modify,
            TransactionKind::Modify,
            TransactionKind::Modify,
            TransactionKind::Add
        ]
    );
    assert_eq!(db.history()[0].field_path(), Some("Address.City"));
}

#[test]
fn test_undo_after_reopen_acts_on_live_item() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contacts.db");
    {
        let db = DataBase::<Contact>::open(&path).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();
        ada.set_name("Countess").unwrap();
    }

    let db = DataBase::<Contact>::open(&path).unwrap();
    let ada = db.get(0).unwrap();
    assert!(db.can_undo());

    db.undo().unwrap();
    assert_eq!(ada.name(), "Ada");

    // Edits on the reloaded item are still tracked
    ada.set_age(3).unwrap();
    assert_eq!(db.history()[0].kind(), TransactionKind::Modify);
    assert!(!db.can_redo());
}

#[test]
fn test_undo_add_after_reopen_then_redo() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contacts.db");
    let id = {
        let db = DataBase::<Contact>::open(&path).unwrap();
        db.add(Contact::new("Ada")).unwrap().identifier()
    };

    {
        let db = DataBase::<Contact>::open(&path).unwrap();
        db.undo().unwrap();
        assert!(db.is_empty());
    }

    let db = DataBase::<Contact>::open(&path).unwrap();
    assert!(db.is_empty());
    assert!(db.can_redo());
    db.redo().unwrap();
    assert_eq!(db.get(0).unwrap().identifier(), id);
}

#[test]
fn test_untracked_write_is_lost_on_reopen_until_next_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contacts.db");
    {
        let db = DataBase::<Contact>::open(&path).unwrap();
        let ada = db.add(Contact::new("Ada")).unwrap();
        ada.set_age_untracked(50).unwrap();
    }

    let db = DataBase::<Contact>::open(&path).unwrap();
    assert_eq!(db.get(0).unwrap().age(), 0);
}

#[test]
fn test_newer_stored_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("versions.db");
    {
        let db = DataBase::<Contact>::builder(&path).config(config(3, 1)).open().unwrap();
        db.add(Contact::new("Ada")).unwrap();
    }

    let result = DataBase::<Contact>::builder(&path).config(config(2, 1)).open();
    assert!(matches!(result, Err(DbError::Creation { .. })));

    // The failed open released the lock
    assert!(DataBase::<Contact>::builder(&path).config(config(3, 1)).open().is_ok());
}

#[test]
fn test_compatible_older_version_loads_and_is_rewritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("versions.db");
    {
        let db = DataBase::<Contact>::builder(&path).config(config(1, 1)).open().unwrap();
        db.add(Contact::new("Ada")).unwrap();
    }

    let db = DataBase::<Contact>::builder(&path).config(config(2, 1)).open().unwrap();
    assert_eq!(db.len(), 1);
    db.add(Contact::new("Bob")).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let stored: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(stored["version"], json!(2));
}

#[test]
fn test_incompatible_version_without_callback_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("versions.db");
    {
        let db = DataBase::<Contact>::open(&path).unwrap();
        db.add(Contact::new("Ada")).unwrap();
    }

    let result = DataBase::<Contact>::builder(&path).config(config(3, 2)).open();
    assert!(result.unwrap_err().is_creation());
}

#[test]
fn test_migration_callback_rewrites_raw_items() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("versions.db");
    {
        let db = DataBase::<Contact>::open(&path).unwrap();
        db.add(Contact::new("ada")).unwrap();
    }

    let db = DataBase::<Contact>::builder(&path)
        .config(config(2, 2))
        .migration(|old: u32, new: u32, items: Vec<Value>| -> DbResult<Vec<Value>> {
            assert_eq!((old, new), (1, 2));
            Ok(items
                .into_iter()
                .map(|mut item| {
                    let upper = item["Name"].as_str().unwrap_or_default().to_uppercase();
                    item["Name"] = json!(upper);
                    item
                })
                .collect())
        })
        .open()
        .unwrap();

    assert_eq!(db.get(0).unwrap().name(), "ADA");
}

#[test]
fn test_failing_migration_aborts_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("versions.db");
    {
        let db = DataBase::<Contact>::open(&path).unwrap();
        db.add(Contact::new("Ada")).unwrap();
    }

    let result = DataBase::<Contact>::builder(&path)
        .config(config(2, 1))
        .migration(|_: u32, _: u32, _: Vec<Value>| -> DbResult<Vec<Value>> {
            Err(DbError::invalid_record("cannot upgrade"))
        })
        .open();
    assert!(result.unwrap_err().is_creation());
}

#[test]
fn test_corrupt_snapshot_fails_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.db");
    std::fs::write(&path, b"{\"version\": 1, \"items\": [42]}").unwrap();

    let result = DataBase::<Contact>::open(&path);
    assert!(result.unwrap_err().is_creation());
}

#[test]
fn test_relative_path_is_canonicalized() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("a").join("..").join("b").join("c.db");

    let db = DataBase::<Contact>::open(&nested).unwrap();
    let expected = dir.path().canonicalize().unwrap().join("b").join("c.db");
    assert_eq!(db.path(), expected);
    assert_eq!(
        db.log_path(),
        expected.with_file_name("transactions_c.data")
    );
}
