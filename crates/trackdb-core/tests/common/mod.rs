//! In-memory harness wiring a live set to a transaction log

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use trackdb_core::fixtures::Contact;
use trackdb_core::{
    ChangeEvent, DbResult, FieldChange, Identifier, LiveSet, TransactionLog, TransactionRecord,
    UndoRedo,
};

/// Live set and log kept in step the way a database keeps them
pub struct Session {
    pub live: LiveSet<Contact>,
    pub log: TransactionLog<Contact>,
    pending: Arc<Mutex<Vec<TransactionRecord<Contact>>>>,
}

impl Session {
    pub fn new() -> Self {
        let pending = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pending);
        let live = LiveSet::with_listener(Arc::new(move |id: Identifier, event: &ChangeEvent| {
            if event.undoable {
                sink.lock().push(TransactionRecord::modified(
                    id,
                    FieldChange {
                        path: event.field.clone(),
                        old_value: event.old_value.clone(),
                        new_value: event.new_value.clone(),
                    },
                ));
            }
            Ok(())
        }));
        Self {
            live,
            log: TransactionLog::new(),
            pending,
        }
    }

    /// Move logged edits into the transaction log
    pub fn sync(&mut self) {
        for record in self.pending.lock().drain(..) {
            self.log.prepend(record);
        }
    }

    pub fn add(&mut self, contact: Contact) -> Arc<Contact> {
        let contact = Arc::new(contact);
        let index = self.live.push(Arc::clone(&contact)).unwrap();
        self.log.prepend(TransactionRecord::added(Arc::clone(&contact), index));
        contact
    }

    pub fn undo(&mut self) -> DbResult<()> {
        self.sync();
        let result = UndoRedo::undo(&mut self.log, &mut self.live);
        self.sync();
        result
    }

    pub fn redo(&mut self) -> DbResult<()> {
        self.sync();
        let result = UndoRedo::redo(&mut self.log, &mut self.live);
        self.sync();
        result
    }

    pub fn can_undo(&mut self) -> bool {
        self.sync();
        UndoRedo::can_undo(&self.log)
    }

    pub fn can_redo(&mut self) -> bool {
        self.sync();
        UndoRedo::can_redo(&self.log)
    }
}
