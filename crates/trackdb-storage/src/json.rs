//! Plain JSON storage

use std::path::Path;

use crate::error::StorageResult;
use crate::strategy::StorageStrategy;

/// Stores snapshots as pretty-printed JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStorage;

impl JsonStorage {
    /// Create a JSON strategy
    pub fn new() -> Self {
        Self
    }
}

impl StorageStrategy for JsonStorage {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, plain: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decode(&self, _path: &Path, stored: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(stored.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RawCollection;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_collection_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.json");
        let storage = JsonStorage::new();

        assert!(storage.load_collection(&path).unwrap().is_none());

        let collection = RawCollection::new(2, vec![json!({"Id": 1, "Name": "a"})]);
        storage.save_collection(&path, &collection).unwrap();
        assert_eq!(storage.load_collection(&path).unwrap(), Some(collection));

        // Human readable on disk
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"Name\": \"a\""));
    }

    #[test]
    fn test_empty_file_reads_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, b"").unwrap();

        let storage = JsonStorage::new();
        assert!(storage.load_collection(&path).unwrap().is_none());
        assert!(storage.load_log(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(JsonStorage::new().load_collection(&path).is_err());
    }
}
