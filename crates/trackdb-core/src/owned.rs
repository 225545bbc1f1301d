//! Ownership of nested tracked objects
//!
//! An owner re-publishes the changes of what it owns: a change of `City` inside
//! the object owned by `Address` reaches the owner's observers as
//! `Address.City`, and a change inside entry `home` of the `Phones` dictionary as
//! `Phones[home].Number`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::{DbError, DbResult};
use crate::field::{FieldStore, ObserverHub, SubscriptionId};
use crate::path::escape_key;
use crate::tracked::{Record, TrackedObject};

/// Sub-object owned by a named field
pub struct Owned<T: TrackedObject> {
    name: &'static str,
    inner: Arc<T>,
    subscription: SubscriptionId,
}

impl<T: TrackedObject> Owned<T> {
    /// Take ownership of `value` under the owner's field `name`
    pub fn new(owner: &FieldStore, name: &'static str, value: T) -> Self {
        let inner = Arc::new(value);
        let subscription = inner.subscribe(owner.hub().forwarder(name.to_string()));
        Self {
            name,
            inner,
            subscription,
        }
    }

    /// Owning field name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Owned object
    pub fn get(&self) -> &Arc<T> {
        &self.inner
    }

    /// Owned object as a trait object, for path resolution
    pub fn as_tracked(&self) -> Arc<dyn TrackedObject> {
        Arc::clone(&self.inner) as Arc<dyn TrackedObject>
    }
}

impl<T: Record> Owned<T> {
    /// Rebuild the owned object from the owner's raw snapshot
    pub fn from_raw(owner: &FieldStore, name: &'static str, raw: &Map<String, Value>) -> DbResult<Self> {
        let value = match raw.get(name) {
            Some(value) => T::from_raw(value)?,
            None => {
                return Err(DbError::invalid_record(format!(
                    "snapshot is missing owned field {}",
                    name
                )))
            }
        };
        Ok(Self::new(owner, name, value))
    }
}

impl<T: TrackedObject> std::ops::Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: TrackedObject> Drop for Owned<T> {
    fn drop(&mut self) {
        self.inner.unsubscribe(self.subscription);
    }
}

/// Dictionary of owned sub-objects under one named field
///
/// Inserting or removing entries is structural and raises no change event;
/// changes inside an entry are re-published as `Field[key].Path`.
pub struct OwnedMap<K, T: TrackedObject> {
    name: &'static str,
    owner: ObserverHub,
    entries: RwLock<BTreeMap<K, (Arc<T>, SubscriptionId)>>,
}

impl<K, T> OwnedMap<K, T>
where
    K: Ord + Clone + Display + FromStr + Send + Sync + 'static,
    T: TrackedObject,
{
    /// Create an empty dictionary under the owner's field `name`
    pub fn new(owner: &FieldStore, name: &'static str) -> Self {
        Self {
            name,
            owner: owner.hub().clone(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Owning field name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert an entry, returning the one it replaced
    pub fn insert(&self, key: K, value: T) -> Option<Arc<T>> {
        self.insert_shared(key, Arc::new(value))
    }

    /// Insert an already shared entry, returning the one it replaced
    pub fn insert_shared(&self, key: K, value: Arc<T>) -> Option<Arc<T>> {
        let prefix = format!("{}[{}]", self.name, escape_key(&key.to_string()));
        let subscription = value.subscribe(self.owner.forwarder(prefix));
        let replaced = self.entries.write().insert(key, (value, subscription));
        replaced.map(|(previous, subscription)| {
            previous.unsubscribe(subscription);
            previous
        })
    }

    /// Remove an entry
    pub fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.entries.write().remove(key);
        removed.map(|(value, subscription)| {
            value.unsubscribe(subscription);
            value
        })
    }

    /// Look up an entry
    pub fn get(&self, key: &K) -> Option<Arc<T>> {
        self.entries.read().get(key).map(|(value, _)| Arc::clone(value))
    }

    /// Look up an entry by the text form of its key
    pub fn get_by_text(&self, key: &str) -> DbResult<Option<Arc<T>>> {
        let parsed = key.parse::<K>().map_err(|_| {
            DbError::invalid_path(
                format!("{}[{}]", self.name, key),
                "key does not convert to the dictionary's key type",
            )
        })?;
        Ok(self.get(&parsed))
    }

    /// Keys in order
    pub fn keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    /// Entries in key order
    pub fn entries(&self) -> Vec<(K, Arc<T>)> {
        self.entries
            .read()
            .iter()
            .map(|(key, (value, _))| (key.clone(), Arc::clone(value)))
            .collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw snapshot keyed by the text form of each key
    pub fn to_raw(&self) -> Value {
        let raw: Map<String, Value> = self
            .entries
            .read()
            .iter()
            .map(|(key, (value, _))| (key.to_string(), value.to_raw()))
            .collect();
        Value::Object(raw)
    }
}

impl<K, T> OwnedMap<K, T>
where
    K: Ord + Clone + Display + FromStr + Send + Sync + 'static,
    T: Record,
{
    /// Rebuild the dictionary from the owner's raw snapshot (absent means empty)
    pub fn from_raw(owner: &FieldStore, name: &'static str, raw: &Map<String, Value>) -> DbResult<Self> {
        let map = Self::new(owner, name);
        if let Some(entries) = raw.get(name) {
            let entries = entries.as_object().ok_or_else(|| {
                DbError::invalid_record(format!("owned dictionary {} must be a JSON object", name))
            })?;
            for (key, value) in entries {
                let parsed = key.parse::<K>().map_err(|_| {
                    DbError::invalid_record(format!("invalid key '{}' in dictionary {}", key, name))
                })?;
                map.insert(parsed, T::from_raw(value)?);
            }
        }
        Ok(map)
    }
}

impl<K, T: TrackedObject> Drop for OwnedMap<K, T> {
    fn drop(&mut self) {
        for (value, subscription) in self.entries.get_mut().values() {
            value.unsubscribe(*subscription);
        }
    }
}
