//! The live record set
//!
//! An ordered set of tracked items, unique by identifier. When the set carries
//! an item listener, every member is subscribed to it while it is in the set.

use std::fmt;
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::field::{ChangeEvent, SubscriptionId};
use crate::identifier::Identifier;
use crate::tracked::TrackedObject;

/// Callback receiving change events of every live item
pub type ItemListener = Arc<dyn Fn(Identifier, &ChangeEvent) -> DbResult<()> + Send + Sync>;

struct Member<T> {
    item: Arc<T>,
    subscription: Option<SubscriptionId>,
}

/// Ordered set of live items
pub struct LiveSet<T: TrackedObject> {
    members: Vec<Member<T>>,
    listener: Option<ItemListener>,
}

impl<T: TrackedObject> LiveSet<T> {
    /// Create an empty set without a listener
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            listener: None,
        }
    }

    /// Create an empty set whose members report changes to `listener`
    pub fn with_listener(listener: ItemListener) -> Self {
        Self {
            members: Vec::new(),
            listener: Some(listener),
        }
    }

    fn attach(&self, item: &Arc<T>) -> Option<SubscriptionId> {
        self.listener.as_ref().map(|listener| {
            let listener = Arc::clone(listener);
            let id = item.identifier();
            item.subscribe(Arc::new(move |event: &ChangeEvent| listener(id, event)))
        })
    }

    fn detach(member: &Member<T>) {
        if let Some(subscription) = member.subscription {
            member.item.unsubscribe(subscription);
        }
    }

    /// Insert at `index` (clamped to the length), returning the actual position
    pub fn insert(&mut self, index: usize, item: Arc<T>) -> DbResult<usize> {
        let id = item.identifier();
        if self.contains(id) {
            return Err(DbError::invalid_record(format!(
                "an item with identifier {} is already present",
                id
            )));
        }
        let index = index.min(self.members.len());
        let subscription = self.attach(&item);
        self.members.insert(index, Member { item, subscription });
        Ok(index)
    }

    /// Append, returning the position
    pub fn push(&mut self, item: Arc<T>) -> DbResult<usize> {
        self.insert(self.members.len(), item)
    }

    /// Remove by identifier, returning the former position and the item
    pub fn remove(&mut self, id: Identifier) -> Option<(usize, Arc<T>)> {
        let index = self.position(id)?;
        let member = self.members.remove(index);
        Self::detach(&member);
        Some((index, member.item))
    }

    /// Remove by position
    pub fn remove_at(&mut self, index: usize) -> DbResult<Arc<T>> {
        if index >= self.members.len() {
            return Err(DbError::IndexOutOfRange {
                index,
                len: self.members.len(),
            });
        }
        let member = self.members.remove(index);
        Self::detach(&member);
        Ok(member.item)
    }

    /// Remove every item, in order
    pub fn clear(&mut self) -> Vec<Arc<T>> {
        self.members
            .drain(..)
            .map(|member| {
                Self::detach(&member);
                member.item
            })
            .collect()
    }

    /// Unsubscribe every member from the listener, keeping them in the set
    pub fn detach_all(&mut self) {
        for member in &mut self.members {
            Self::detach(member);
            member.subscription = None;
        }
    }

    /// Item at `index`
    pub fn get(&self, index: usize) -> Option<Arc<T>> {
        self.members.get(index).map(|member| Arc::clone(&member.item))
    }

    /// Item with the given identifier
    pub fn find(&self, id: Identifier) -> Option<Arc<T>> {
        self.members
            .iter()
            .find(|member| member.item.identifier() == id)
            .map(|member| Arc::clone(&member.item))
    }

    /// Position of the item with the given identifier
    pub fn position(&self, id: Identifier) -> Option<usize> {
        self.members
            .iter()
            .position(|member| member.item.identifier() == id)
    }

    /// Whether an item with the given identifier is present
    pub fn contains(&self, id: Identifier) -> bool {
        self.position(id).is_some()
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of the items, in order
    pub fn items(&self) -> Vec<Arc<T>> {
        self.members
            .iter()
            .map(|member| Arc::clone(&member.item))
            .collect()
    }
}

impl<T: TrackedObject> Default for LiveSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TrackedObject> Drop for LiveSet<T> {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl<T: TrackedObject> fmt::Debug for LiveSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.members.iter().map(|member| member.item.identifier()))
            .finish()
    }
}
