//! Process-wide ordering of mutations
//!
//! Field writes and structural database edits all run inside one reentrant
//! critical section, so a change and the log record it produces are never
//! interleaved with another thread's. Code that writes fields while holding
//! other locks can queue the resulting events with [`DeferredEvents`] and
//! deliver them once those locks are released.

use std::cell::RefCell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::warn;

use crate::error::DbResult;
use crate::field::{ChangeEvent, ObserverHub};

/// Serializes mutations across every tracked object and database in the process
pub static CRITICAL_SECTION: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

/// Enter the critical section; re-entering on the holding thread never blocks
pub fn critical_section() -> ReentrantMutexGuard<'static, ()> {
    CRITICAL_SECTION.lock()
}

type Pending = Vec<(ObserverHub, ChangeEvent)>;

thread_local! {
    static DEFERRED: RefCell<Option<Pending>> = RefCell::new(None);
}

/// Queues change events raised on this thread until delivered
///
/// Nested queues share the outermost one. Dropping the queue without calling
/// [`deliver`](Self::deliver) still delivers, logging observer failures.
#[must_use = "dropping the queue delivers its events immediately"]
pub struct DeferredEvents {
    owner: bool,
}

impl DeferredEvents {
    /// Start queueing events raised on this thread
    pub fn begin() -> Self {
        let owner = DEFERRED.with(|deferred| {
            let mut deferred = deferred.borrow_mut();
            if deferred.is_some() {
                false
            } else {
                *deferred = Some(Vec::new());
                true
            }
        });
        Self { owner }
    }

    /// Publish the queued events in order, returning the first observer failure
    pub fn deliver(mut self) -> DbResult<()> {
        let mut result = Ok(());
        for (hub, event) in self.take() {
            let published = hub.publish(&event);
            if result.is_ok() {
                result = published;
            }
        }
        result
    }

    fn take(&mut self) -> Pending {
        if !self.owner {
            return Vec::new();
        }
        self.owner = false;
        DEFERRED
            .with(|deferred| deferred.borrow_mut().take())
            .unwrap_or_default()
    }
}

impl Drop for DeferredEvents {
    fn drop(&mut self) {
        for (hub, event) in self.take() {
            if let Err(e) = hub.publish(&event) {
                warn!("Observer of {} failed on delivery: {}", event.field, e);
            }
        }
    }
}

/// Queue `event` for `hub` when this thread is deferring, else hand it back
pub(crate) fn queue_if_deferring(hub: &ObserverHub, event: ChangeEvent) -> Option<ChangeEvent> {
    DEFERRED.with(|deferred| match deferred.borrow_mut().as_mut() {
        Some(pending) => {
            pending.push((hub.clone(), event));
            None
        }
        None => Some(event),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    fn event(field: &str) -> ChangeEvent {
        ChangeEvent {
            field: field.to_string(),
            old_value: json!(0),
            new_value: json!(1),
            undoable: false,
        }
    }

    fn recording_hub() -> (ObserverHub, Arc<Mutex<Vec<String>>>) {
        let hub = ObserverHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.subscribe(Arc::new(move |event: &ChangeEvent| {
            sink.lock().push(event.field.clone());
            Ok(())
        }));
        (hub, seen)
    }

    #[test]
    fn test_events_pass_through_without_a_queue() {
        let (hub, _) = recording_hub();
        assert!(queue_if_deferring(&hub, event("A")).is_some());
    }

    #[test]
    fn test_queued_events_are_delivered_in_order() {
        let (hub, seen) = recording_hub();
        let deferred = DeferredEvents::begin();
        assert!(queue_if_deferring(&hub, event("A")).is_none());

        // A nested queue hands its events to the outer one
        let nested = DeferredEvents::begin();
        assert!(queue_if_deferring(&hub, event("B")).is_none());
        nested.deliver().unwrap();
        assert!(seen.lock().is_empty());

        deferred.deliver().unwrap();
        assert_eq!(*seen.lock(), vec!["A", "B"]);
        assert!(queue_if_deferring(&hub, event("C")).is_some());
    }

    #[test]
    fn test_dropped_queue_still_delivers() {
        let (hub, seen) = recording_hub();
        {
            let _deferred = DeferredEvents::begin();
            queue_if_deferring(&hub, event("A"));
        }
        assert_eq!(*seen.lock(), vec!["A"]);
    }

    #[test]
    fn test_critical_section_is_reentrant() {
        let _outer = critical_section();
        let _inner = critical_section();
    }
}
