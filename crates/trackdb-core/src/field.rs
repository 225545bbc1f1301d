//! Tracked field store
//!
//! Every tracked object keeps its field values in a [`FieldStore`]. Writes go
//! through typed [`Field`] accessors declared once per type, and every effective
//! change is published as a [`ChangeEvent`] to the store's observers.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::identifier::Identifier;
use crate::sync;

/// Key under which a store's identifier appears in its raw snapshot
pub const ID_KEY: &str = "Id";

/// Extended change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Field path relative to the object that raised the event
    pub field: String,
    /// Value before the change (the type default if the field was unset)
    pub old_value: Value,
    /// Value after the change
    pub new_value: Value,
    /// Whether the change should be recorded for undo
    pub undoable: bool,
}

impl ChangeEvent {
    /// Re-address this event under an owning field or dictionary entry
    pub fn nested(&self, prefix: &str) -> Self {
        Self {
            field: format!("{}.{}", prefix, self.field),
            ..self.clone()
        }
    }
}

/// Callback invoked for every change event
pub type ChangeObserver = Arc<dyn Fn(&ChangeEvent) -> DbResult<()> + Send + Sync>;

/// Handle returned by [`ObserverHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    next: u64,
    entries: Vec<(SubscriptionId, ChangeObserver)>,
}

/// Shared list of observers for one object
#[derive(Clone, Default)]
pub struct ObserverHub {
    inner: Arc<RwLock<Subscribers>>,
}

impl ObserverHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe(&self, observer: ChangeObserver) -> SubscriptionId {
        let mut subscribers = self.inner.write();
        let id = SubscriptionId(subscribers.next);
        subscribers.next += 1;
        subscribers.entries.push((id, observer));
        id
    }

    /// Remove an observer, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.write();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry, _)| *entry != id);
        subscribers.entries.len() != before
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every observer, stopping at the first failure
    pub fn publish(&self, event: &ChangeEvent) -> DbResult<()> {
        // Observers may subscribe or read fields, so call them outside the lock
        let observers: Vec<ChangeObserver> = self
            .inner
            .read()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer(event)?;
        }
        Ok(())
    }

    /// Observer that re-publishes events on this hub under `prefix`
    pub fn forwarder(&self, prefix: String) -> ChangeObserver {
        let hub = self.clone();
        Arc::new(move |event: &ChangeEvent| hub.publish(&event.nested(&prefix)))
    }
}

/// Options for [`FieldStore::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Publish a change event when the value changes
    pub raise_event: bool,
    /// Mark the published event as undoable
    pub undoable: bool,
}

impl SetOptions {
    /// Store without notifying anyone
    pub const fn silent() -> Self {
        Self {
            raise_event: false,
            undoable: false,
        }
    }

    /// Notify observers but keep the change out of the transaction log
    pub const fn not_undoable() -> Self {
        Self {
            raise_event: true,
            undoable: false,
        }
    }
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            raise_event: true,
            undoable: true,
        }
    }
}

/// Schema entry: a field name with its default and type coercion
#[derive(Clone, Copy)]
pub struct FieldSpec {
    name: &'static str,
    default: fn() -> Value,
    coerce: fn(Value) -> Result<Value, serde_json::Error>,
}

impl FieldSpec {
    /// Field name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Default value of the declared type
    pub fn default_value(&self) -> Value {
        (self.default)()
    }

    /// Convert a raw value to the declared type's representation
    pub fn coerce(&self, value: Value) -> DbResult<Value> {
        (self.coerce)(value).map_err(|e| DbError::Coercion {
            field: self.name.to_string(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec").field("name", &self.name).finish()
    }
}

/// The static field registry of a tracked type
pub type Schema = &'static [FieldSpec];

/// Typed accessor for one field of a tracked type
///
/// ```ignore
/// const NAME: Field<String> = Field::new("Name");
/// static SCHEMA: &[FieldSpec] = &[NAME.spec()];
/// ```
pub struct Field<V> {
    name: &'static str,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Field<V>
where
    V: Serialize + DeserializeOwned + Default + 'static,
{
    /// Declare a field
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Schema entry for this field
    pub const fn spec(&self) -> FieldSpec {
        FieldSpec {
            name: self.name,
            default: default_value::<V>,
            coerce: coerce_value::<V>,
        }
    }

    /// Field name
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Read the field, falling back to the type default
    pub fn get(&self, store: &FieldStore) -> V {
        let raw = match store.get(self.name) {
            Ok(raw) => raw,
            Err(_) => return V::default(),
        };
        match serde_json::from_value(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Field {} holds an unreadable value: {}", self.name, e);
                V::default()
            }
        }
    }

    /// Write the field with an undoable change event
    pub fn set(&self, store: &FieldStore, value: V) -> DbResult<bool> {
        self.set_with(store, value, SetOptions::default())
    }

    /// Write the field with explicit event options
    pub fn set_with(&self, store: &FieldStore, value: V, options: SetOptions) -> DbResult<bool> {
        store.set(self.name, serde_json::to_value(value)?, options)
    }
}

fn default_value<V: Serialize + Default>() -> Value {
    serde_json::to_value(V::default()).unwrap_or(Value::Null)
}

fn coerce_value<V: Serialize + DeserializeOwned + Default>(
    value: Value,
) -> Result<Value, serde_json::Error> {
    let typed: V = match serde_json::from_value::<V>(value.clone()) {
        Ok(typed) => typed,
        Err(err) => match value {
            // null into a non-nullable field
            Value::Null => V::default(),
            // "42" into a number, "true" into a bool
            Value::String(text) => serde_json::from_str(&text).map_err(|_| err)?,
            // 42 into a string, an enum variant name stored as number text
            Value::Number(_) | Value::Bool(_) => {
                serde_json::from_value(Value::String(value.to_string())).map_err(|_| err)?
            }
            _ => return Err(err),
        },
    };
    serde_json::to_value(typed)
}

/// Per-object dictionary of named field values with change notification
pub struct FieldStore {
    schema: Schema,
    identifier: RwLock<Identifier>,
    values: RwLock<HashMap<&'static str, Value>>,
    hub: ObserverHub,
}

impl FieldStore {
    /// Create a store with a fresh identifier
    pub fn new(schema: Schema) -> Self {
        Self::with_identifier(schema, Identifier::new())
    }

    /// Create a store with a known identifier
    pub fn with_identifier(schema: Schema, identifier: Identifier) -> Self {
        Self {
            schema,
            identifier: RwLock::new(identifier),
            values: RwLock::new(HashMap::new()),
            hub: ObserverHub::new(),
        }
    }

    /// Identifier of the owning object
    pub fn identifier(&self) -> Identifier {
        *self.identifier.read()
    }

    /// Replace the identifier
    pub fn set_identifier(&self, identifier: Identifier) {
        *self.identifier.write() = identifier;
    }

    /// Declared fields
    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// Schema entry for a field name
    pub fn spec(&self, name: &str) -> DbResult<&'static FieldSpec> {
        self.schema
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| DbError::UnknownField(name.to_string()))
    }

    /// Observers of this object
    pub fn hub(&self) -> &ObserverHub {
        &self.hub
    }

    /// Current value, or the declared default when unset
    pub fn get(&self, name: &str) -> DbResult<Value> {
        let spec = self.spec(name)?;
        Ok(self
            .values
            .read()
            .get(spec.name)
            .cloned()
            .unwrap_or_else(|| spec.default_value()))
    }

    /// Whether a value has ever been stored for the field
    pub fn is_set(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    /// Store a value; returns false (and does nothing else) when it is unchanged
    ///
    /// The compare, the store and the event all happen inside the process-wide
    /// critical section, so observers see writes to one field in store order.
    pub fn set(&self, name: &str, value: Value, options: SetOptions) -> DbResult<bool> {
        let spec = self.spec(name)?;
        let _section = sync::critical_section();
        let old_value = {
            let mut values = self.values.write();
            let previous = values
                .get(spec.name)
                .cloned()
                .unwrap_or_else(|| spec.default_value());
            if previous == value {
                return Ok(false);
            }
            values.insert(spec.name, value.clone());
            previous
        };

        if options.raise_event {
            let event = ChangeEvent {
                field: spec.name.to_string(),
                old_value,
                new_value: value,
                undoable: options.undoable,
            };
            if let Some(event) = sync::queue_if_deferring(&self.hub, event) {
                self.hub.publish(&event)?;
            }
        }
        Ok(true)
    }

    /// Coerce a raw value to the field's declared type, then store it
    pub fn assign(&self, name: &str, value: Value, options: SetOptions) -> DbResult<bool> {
        let coerced = self.spec(name)?.coerce(value)?;
        self.set(name, coerced, options)
    }

    /// Register an observer
    pub fn subscribe(&self, observer: ChangeObserver) -> SubscriptionId {
        self.hub.subscribe(observer)
    }

    /// Remove an observer
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Snapshot of the identifier and every declared field
    pub fn to_raw(&self) -> Map<String, Value> {
        let mut raw = Map::new();
        raw.insert(ID_KEY.to_string(), serde_json::json!(self.identifier()));
        let values = self.values.read();
        for spec in self.schema {
            let value = values
                .get(spec.name)
                .cloned()
                .unwrap_or_else(|| spec.default_value());
            raw.insert(spec.name.to_string(), value);
        }
        raw
    }

    /// Load the identifier and declared fields from a snapshot, without events
    pub fn load_raw(&self, raw: &Map<String, Value>) -> DbResult<()> {
        if let Some(id) = raw.get(ID_KEY) {
            self.set_identifier(serde_json::from_value(id.clone())?);
        }
        for spec in self.schema {
            if let Some(value) = raw.get(spec.name) {
                let coerced = spec.coerce(value.clone())?;
                self.values.write().insert(spec.name, coerced);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldStore")
            .field("identifier", &self.identifier())
            .field("values", &*self.values.read())
            .finish()
    }
}
