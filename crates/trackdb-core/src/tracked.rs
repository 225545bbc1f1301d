//! The tracked-object capability

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{DbError, DbResult};
use crate::field::{ChangeObserver, FieldStore, SubscriptionId};
use crate::identifier::Identifier;

/// An object whose field writes are observable, nameable deltas
pub trait TrackedObject: Send + Sync + 'static {
    /// Backing field store
    fn fields(&self) -> &FieldStore;

    /// Stable key of the object
    fn identifier(&self) -> Identifier {
        self.fields().identifier()
    }

    /// Owned sub-object stored in `field`, or in entry `key` of the dictionary
    /// stored in `field`
    ///
    /// Returns `Ok(None)` when the object owns nothing under that name.
    fn owned(&self, field: &str, key: Option<&str>) -> DbResult<Option<Arc<dyn TrackedObject>>> {
        let _ = (field, key);
        Ok(None)
    }

    /// Raw snapshot of the object, including owned sub-objects
    fn to_raw(&self) -> Value {
        Value::Object(self.fields().to_raw())
    }

    /// Register a change observer
    fn subscribe(&self, observer: ChangeObserver) -> SubscriptionId {
        self.fields().subscribe(observer)
    }

    /// Remove a change observer
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.fields().unsubscribe(id)
    }
}

/// A tracked object that can be rebuilt from its raw snapshot
pub trait Record: TrackedObject + Sized {
    /// Rebuild from the value produced by [`TrackedObject::to_raw`]
    fn from_raw(raw: &Value) -> DbResult<Self>;
}

/// Borrow a raw snapshot as a JSON object
pub fn raw_object<'a>(raw: &'a Value, type_name: &str) -> DbResult<&'a Map<String, Value>> {
    raw.as_object().ok_or_else(|| {
        DbError::invalid_record(format!("{} snapshot must be a JSON object", type_name))
    })
}
