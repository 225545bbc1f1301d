//! Transaction records
//!
//! Every mutation of a database produces one [`TransactionRecord`]. Records know
//! how to revert themselves against the live set, producing the record that
//! describes the inverse action.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::field::SetOptions;
use crate::identifier::Identifier;
use crate::live::LiveSet;
use crate::path::FieldPath;
use crate::tracked::{Record, TrackedObject};

/// Kind of a transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// An item entered the collection
    Add,
    /// An item left the collection
    Delete,
    /// A field of a live item changed
    Modify,
    /// An earlier record was undone
    Undo,
    /// An undo was reverted
    Redo,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Add => "Add",
            TransactionKind::Delete => "Delete",
            TransactionKind::Modify => "Modify",
            TransactionKind::Undo => "Undo",
            TransactionKind::Redo => "Redo",
        };
        f.write_str(name)
    }
}

/// A field edit addressed by path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field path on the changed item
    pub path: String,
    /// Value before the edit
    pub old_value: Value,
    /// Value after the edit
    pub new_value: Value,
}

impl FieldChange {
    /// The same edit in the opposite direction
    pub fn swapped(&self) -> Self {
        Self {
            path: self.path.clone(),
            old_value: self.new_value.clone(),
            new_value: self.old_value.clone(),
        }
    }
}

/// An item entering or leaving the collection at a position
pub struct ItemChange<T> {
    /// The transacted item
    pub item: Arc<T>,
    /// Position in the collection
    pub index: usize,
}

impl<T> Clone for ItemChange<T> {
    fn clone(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
            index: self.index,
        }
    }
}

/// The change an Undo or Redo record acts on
pub enum Operation<T> {
    /// Membership change of an added item
    Add(ItemChange<T>),
    /// Membership change of a deleted item
    Delete(ItemChange<T>),
    /// Field edit
    Modify(FieldChange),
}

impl<T> Operation<T> {
    /// Kind of the wrapped change
    pub fn kind(&self) -> TransactionKind {
        match self {
            Operation::Add(_) => TransactionKind::Add,
            Operation::Delete(_) => TransactionKind::Delete,
            Operation::Modify(_) => TransactionKind::Modify,
        }
    }
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        match self {
            Operation::Add(change) => Operation::Add(change.clone()),
            Operation::Delete(change) => Operation::Delete(change.clone()),
            Operation::Modify(change) => Operation::Modify(change.clone()),
        }
    }
}

/// Payload of a transaction record
pub enum Change<T> {
    /// An item was added
    Add(ItemChange<T>),
    /// An item was deleted
    Delete(ItemChange<T>),
    /// A field was edited
    Modify(FieldChange),
    /// The wrapped operation was undone
    Undo(Operation<T>),
    /// The undo of the wrapped operation was reverted
    Redo(Operation<T>),
}

impl<T> Clone for Change<T> {
    fn clone(&self) -> Self {
        match self {
            Change::Add(change) => Change::Add(change.clone()),
            Change::Delete(change) => Change::Delete(change.clone()),
            Change::Modify(change) => Change::Modify(change.clone()),
            Change::Undo(operation) => Change::Undo(operation.clone()),
            Change::Redo(operation) => Change::Redo(operation.clone()),
        }
    }
}

impl<T> Change<T> {
    /// Record kind
    pub fn kind(&self) -> TransactionKind {
        match self {
            Change::Add(_) => TransactionKind::Add,
            Change::Delete(_) => TransactionKind::Delete,
            Change::Modify(_) => TransactionKind::Modify,
            Change::Undo(_) => TransactionKind::Undo,
            Change::Redo(_) => TransactionKind::Redo,
        }
    }

    /// Wrapped operation kind for Undo and Redo records
    pub fn sub_kind(&self) -> Option<TransactionKind> {
        match self {
            Change::Undo(operation) | Change::Redo(operation) => Some(operation.kind()),
            _ => None,
        }
    }

    /// The underlying operation, whatever the direction
    fn operation(&self) -> Operation<T> {
        match self {
            Change::Add(change) => Operation::Add(change.clone()),
            Change::Delete(change) => Operation::Delete(change.clone()),
            Change::Modify(change) => Operation::Modify(change.clone()),
            Change::Undo(operation) | Change::Redo(operation) => operation.clone(),
        }
    }

    fn field_change(&self) -> Option<&FieldChange> {
        match self {
            Change::Modify(change)
            | Change::Undo(Operation::Modify(change))
            | Change::Redo(Operation::Modify(change)) => Some(change),
            _ => None,
        }
    }

    fn item_change_mut(&mut self) -> Option<&mut ItemChange<T>> {
        match self {
            Change::Add(change)
            | Change::Delete(change)
            | Change::Undo(Operation::Add(change))
            | Change::Undo(Operation::Delete(change))
            | Change::Redo(Operation::Add(change))
            | Change::Redo(Operation::Delete(change)) => Some(change),
            _ => None,
        }
    }

    fn item_change(&self) -> Option<&ItemChange<T>> {
        match self {
            Change::Add(change)
            | Change::Delete(change)
            | Change::Undo(Operation::Add(change))
            | Change::Undo(Operation::Delete(change))
            | Change::Redo(Operation::Add(change))
            | Change::Redo(Operation::Delete(change)) => Some(change),
            _ => None,
        }
    }
}

/// One logged, revertible change
pub struct TransactionRecord<T> {
    id: String,
    timestamp: DateTime<Utc>,
    active: bool,
    item_id: Identifier,
    reverted: Option<String>,
    change: Change<T>,
}

// Clones share the transacted item
impl<T> Clone for TransactionRecord<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            timestamp: self.timestamp,
            active: self.active,
            item_id: self.item_id,
            reverted: self.reverted.clone(),
            change: self.change.clone(),
        }
    }
}

impl<T: TrackedObject> TransactionRecord<T> {
    fn new(item_id: Identifier, change: Change<T>, reverted: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            active: true,
            item_id,
            reverted,
            change,
        }
    }

    /// Record of `item` entering the collection at `index`
    pub fn added(item: Arc<T>, index: usize) -> Self {
        let item_id = item.identifier();
        Self::new(item_id, Change::Add(ItemChange { item, index }), None)
    }

    /// Record of `item` leaving the collection from `index`
    pub fn deleted(item: Arc<T>, index: usize) -> Self {
        let item_id = item.identifier();
        Self::new(item_id, Change::Delete(ItemChange { item, index }), None)
    }

    /// Record of a field edit on the item `item_id`
    pub fn modified(item_id: Identifier, change: FieldChange) -> Self {
        Self::new(item_id, Change::Modify(change), None)
    }

    /// Unique record id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation time
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the record has not been reverted yet
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Identifier of the changed item
    pub fn item_id(&self) -> Identifier {
        self.item_id
    }

    /// Id of the record this one reverted
    pub fn reverted(&self) -> Option<&str> {
        self.reverted.as_deref()
    }

    /// Payload
    pub fn change(&self) -> &Change<T> {
        &self.change
    }

    /// Record kind
    pub fn kind(&self) -> TransactionKind {
        self.change.kind()
    }

    /// Wrapped kind of an Undo or Redo record
    pub fn sub_kind(&self) -> Option<TransactionKind> {
        self.change.sub_kind()
    }

    /// Changed field path of a field edit
    pub fn field_path(&self) -> Option<&str> {
        self.change.field_change().map(|change| change.path.as_str())
    }

    /// Old value of a field edit
    pub fn old_value(&self) -> Option<&Value> {
        self.change.field_change().map(|change| &change.old_value)
    }

    /// New value of a field edit
    pub fn new_value(&self) -> Option<&Value> {
        self.change.field_change().map(|change| &change.new_value)
    }

    /// Item carried by a membership change
    pub fn transacted_item(&self) -> Option<&Arc<T>> {
        self.change.item_change().map(|change| &change.item)
    }

    /// Recorded position of a membership change
    pub fn index(&self) -> Option<usize> {
        self.change.item_change().map(|change| change.index)
    }

    /// Apply the inverse of this record to `live`
    ///
    /// Marks this record inactive and returns the record describing the inverse:
    /// a Redo when this record is an Undo, an Undo otherwise. On failure this
    /// record stays active and `live` is unchanged.
    pub fn revert(&mut self, live: &mut LiveSet<T>) -> DbResult<TransactionRecord<T>> {
        let reverting_undo = self.kind() == TransactionKind::Undo;
        let fail = |reason: String| {
            if reverting_undo {
                DbError::cannot_redo(reason)
            } else {
                DbError::cannot_undo(reason)
            }
        };
        let item_id = self.item_id;

        let inverse = match self.change.operation() {
            Operation::Modify(change) => {
                let item = live
                    .find(item_id)
                    .ok_or_else(|| fail(format!("item {} is not in the collection", item_id)))?;
                let path = FieldPath::parse(&change.path).map_err(|e| fail(e.to_string()))?;
                path.assign(item.as_ref(), change.old_value.clone(), SetOptions::not_undoable())
                    .map_err(|e| fail(e.to_string()))?;
                Operation::Modify(change.swapped())
            }
            // An Add leaves the collection when undone and a Delete re-enters it;
            // reverting an Undo flips the direction back.
            Operation::Add(change) => {
                Operation::Add(toggle_membership(live, item_id, change, !reverting_undo).map_err(fail)?)
            }
            Operation::Delete(change) => {
                Operation::Delete(toggle_membership(live, item_id, change, reverting_undo).map_err(fail)?)
            }
        };

        self.active = false;
        debug!("Reverted {} record {} for item {}", self.kind(), self.id, item_id);

        let change = if reverting_undo {
            Change::Redo(inverse)
        } else {
            Change::Undo(inverse)
        };
        Ok(TransactionRecord::new(item_id, change, Some(self.id.clone())))
    }

    /// Point a membership record at the live item with the same identifier
    ///
    /// Returns whether the record now shares the live instance.
    pub(crate) fn relink(&mut self, live: &LiveSet<T>) -> bool {
        let item_id = self.item_id;
        match (self.change.item_change_mut(), live.find(item_id)) {
            (Some(change), Some(item)) => {
                change.item = item;
                true
            }
            _ => false,
        }
    }

    /// Replace the carried item with another shared instance of it
    pub(crate) fn share_item(&mut self, item: &Arc<T>) {
        if let Some(change) = self.change.item_change_mut() {
            change.item = Arc::clone(item);
        }
    }

    /// Flat persisted form
    pub fn to_raw(&self) -> RawRecord {
        let field = self.change.field_change();
        let item = self.change.item_change();
        RawRecord {
            id: self.id.clone(),
            timestamp: self.timestamp,
            kind: self.kind(),
            sub_kind: self.sub_kind(),
            active: self.active,
            changed_item_id: self.item_id,
            changed_field_path: field.map(|change| change.path.clone()),
            old_value: field.map(|change| change.old_value.clone()),
            new_value: field.map(|change| change.new_value.clone()),
            transacted_item: item.map(|change| change.item.to_raw()),
            index: item.map(|change| change.index),
            reverted: self.reverted.clone(),
        }
    }
}

/// Move an item out of or back into the live set, returning where it was
fn toggle_membership<T: TrackedObject>(
    live: &mut LiveSet<T>,
    item_id: Identifier,
    change: ItemChange<T>,
    leaves: bool,
) -> Result<ItemChange<T>, String> {
    if leaves {
        let (index, item) = live
            .remove(item_id)
            .ok_or_else(|| format!("item {} is not in the collection", item_id))?;
        Ok(ItemChange { item, index })
    } else {
        let index = live
            .insert(change.index, Arc::clone(&change.item))
            .map_err(|e| e.to_string())?;
        Ok(ItemChange {
            item: change.item,
            index,
        })
    }
}

impl<T: Record> TransactionRecord<T> {
    /// Rebuild a record from its persisted form
    pub fn from_raw(raw: RawRecord) -> DbResult<Self> {
        let operation = |kind: TransactionKind| -> DbResult<Operation<T>> {
            match kind {
                TransactionKind::Add | TransactionKind::Delete => {
                    let item = raw.transacted_item.as_ref().ok_or_else(|| {
                        DbError::invalid_record(format!("{} record {} carries no item", kind, raw.id))
                    })?;
                    let change = ItemChange {
                        item: Arc::new(T::from_raw(item)?),
                        index: raw.index.unwrap_or(0),
                    };
                    Ok(if kind == TransactionKind::Add {
                        Operation::Add(change)
                    } else {
                        Operation::Delete(change)
                    })
                }
                TransactionKind::Modify => {
                    let path = raw.changed_field_path.clone().ok_or_else(|| {
                        DbError::invalid_record(format!("Modify record {} has no field path", raw.id))
                    })?;
                    Ok(Operation::Modify(FieldChange {
                        path,
                        old_value: raw.old_value.clone().unwrap_or(Value::Null),
                        new_value: raw.new_value.clone().unwrap_or(Value::Null),
                    }))
                }
                TransactionKind::Undo | TransactionKind::Redo => Err(DbError::invalid_record(format!(
                    "record {} wraps a {} record",
                    raw.id, kind
                ))),
            }
        };

        let change = match raw.kind {
            TransactionKind::Undo | TransactionKind::Redo => {
                let sub_kind = raw.sub_kind.ok_or_else(|| {
                    DbError::invalid_record(format!("{} record {} has no sub kind", raw.kind, raw.id))
                })?;
                let wrapped = operation(sub_kind)?;
                if raw.kind == TransactionKind::Undo {
                    Change::Undo(wrapped)
                } else {
                    Change::Redo(wrapped)
                }
            }
            kind => match operation(kind)? {
                Operation::Add(change) => Change::Add(change),
                Operation::Delete(change) => Change::Delete(change),
                Operation::Modify(change) => Change::Modify(change),
            },
        };

        Ok(Self {
            id: raw.id,
            timestamp: raw.timestamp,
            active: raw.active,
            item_id: raw.changed_item_id,
            reverted: raw.reverted,
            change,
        })
    }
}

impl<T: TrackedObject> fmt::Debug for TransactionRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRecord")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("sub_kind", &self.sub_kind())
            .field("active", &self.active)
            .field("item_id", &self.item_id)
            .field("field_path", &self.field_path())
            .finish()
    }
}

/// Persisted form of a transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    /// Unique record id
    pub id: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Record kind
    pub kind: TransactionKind,
    /// Wrapped kind of Undo and Redo records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_kind: Option<TransactionKind>,
    /// Whether the record has not been reverted
    pub active: bool,
    /// Identifier of the changed item
    pub changed_item_id: Identifier,
    /// Field path of a field edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_field_path: Option<String>,
    /// Old value of a field edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// New value of a field edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Snapshot of the item of a membership change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transacted_item: Option<Value>,
    /// Position of a membership change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Id of the record this one reverted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted: Option<String>,
}
