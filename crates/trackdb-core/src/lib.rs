#![warn(missing_docs)]

//! Change tracking core for trackdb
//!
//! Turns field writes on tracked objects into observable, nameable deltas,
//! records them as reversible transaction records, and walks the transaction log
//! to undo and redo them.

pub mod error;
pub mod field;
pub mod fingerprint;
pub mod history;
pub mod identifier;
pub mod live;
pub mod owned;
pub mod path;
pub mod sync;
pub mod tracked;
pub mod transaction;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

// Re-export public API
pub use error::{DbError, DbResult};
pub use field::{
    ChangeEvent, ChangeObserver, Field, FieldSpec, FieldStore, ObserverHub, Schema, SetOptions,
    SubscriptionId, ID_KEY,
};
pub use fingerprint::HardwareFingerprint;
pub use history::{TransactionLog, UndoRedo};
pub use identifier::{Identifier, ParseIdentifierError};
pub use live::{ItemListener, LiveSet};
pub use owned::{Owned, OwnedMap};
pub use path::{escape_key, FieldPath, PathSegment};
pub use sync::{critical_section, DeferredEvents, CRITICAL_SECTION};
pub use tracked::{raw_object, Record, TrackedObject};
pub use transaction::{
    Change, FieldChange, ItemChange, Operation, RawRecord, TransactionKind, TransactionRecord,
};
