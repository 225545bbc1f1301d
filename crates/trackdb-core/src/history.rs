//! Transaction log and the undo/redo engine

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::identifier::Identifier;
use crate::live::LiveSet;
use crate::tracked::{Record, TrackedObject};
use crate::transaction::{RawRecord, TransactionKind, TransactionRecord};

/// Newest-first sequence of transaction records
///
/// The log is never compacted: reverted records stay beneath the records that
/// reverted them.
pub struct TransactionLog<T> {
    records: VecDeque<TransactionRecord<T>>,
}

impl<T: TrackedObject> TransactionLog<T> {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    /// Add a record at the head
    pub fn prepend(&mut self, record: TransactionRecord<T>) {
        debug!("Logged {} record {} for item {}", record.kind(), record.id(), record.item_id());
        self.records.push_front(record);
    }

    /// Record at `index`, counted from the newest
    pub fn get(&self, index: usize) -> Option<&TransactionRecord<T>> {
        self.records.get(index)
    }

    /// Newest record
    pub fn head(&self) -> Option<&TransactionRecord<T>> {
        self.records.front()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records, newest first
    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord<T>> {
        self.records.iter()
    }

    /// Up to `limit` records after skipping the `offset` newest
    pub fn history(&self, limit: usize, offset: usize) -> Vec<&TransactionRecord<T>> {
        self.records.iter().skip(offset).take(limit).collect()
    }

    /// Every record that changed the given item, newest first
    pub fn records_for_item(&self, id: Identifier) -> Vec<&TransactionRecord<T>> {
        self.records
            .iter()
            .filter(|record| record.item_id() == id)
            .collect()
    }

    /// Record with the given record id
    pub fn find(&self, record_id: &str) -> Option<&TransactionRecord<T>> {
        self.records.iter().find(|record| record.id() == record_id)
    }

    /// Number of records of `kind` anywhere in the log
    pub fn count_kind(&self, kind: TransactionKind) -> usize {
        self.records
            .iter()
            .filter(|record| record.kind() == kind)
            .count()
    }

    /// Length of the contiguous run of `kind` records starting at `from`
    pub fn leading_run(&self, from: usize, kind: TransactionKind) -> usize {
        self.records
            .iter()
            .skip(from)
            .take_while(|record| record.kind() == kind)
            .count()
    }

    /// Make membership records share item instances with the live set
    ///
    /// Records of items that are not live share one instance per identifier, so
    /// a reverted delete re-inserts the object later records refer to.
    pub fn relink(&mut self, live: &LiveSet<T>) {
        let mut detached: HashMap<Identifier, Arc<T>> = HashMap::new();
        for record in self.records.iter_mut() {
            if record.relink(live) {
                continue;
            }
            if let Some(item) = record.transacted_item() {
                let shared = detached
                    .entry(record.item_id())
                    .or_insert_with(|| Arc::clone(item))
                    .clone();
                record.share_item(&shared);
            }
        }
    }

    /// Persisted form, newest first
    pub fn to_raw(&self) -> Vec<RawRecord> {
        self.records.iter().map(TransactionRecord::to_raw).collect()
    }
}

impl<T: Record> TransactionLog<T> {
    /// Rebuild a log from its persisted form
    pub fn from_raw(raw: Vec<RawRecord>) -> DbResult<Self> {
        let records = raw
            .into_iter()
            .map(TransactionRecord::from_raw)
            .collect::<DbResult<VecDeque<_>>>()?;
        Ok(Self { records })
    }
}

impl<T: TrackedObject> Default for TransactionLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TrackedObject> std::fmt::Debug for TransactionLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.records.iter()).finish()
    }
}

/// The undo/redo algorithm over a transaction log
///
/// Every Undo or Redo record sits above the record it reverted, so a run of `n`
/// such records at some position pairs with the `n` records beneath it; the
/// walk skips `2 × n` records to step over both.
pub struct UndoRedo;

impl UndoRedo {
    /// Whether an undo is possible
    ///
    /// Counts Undo records across the whole log, not only the leading run.
    pub fn can_undo<T: TrackedObject>(log: &TransactionLog<T>) -> bool {
        let total = log.len();
        total > 0 && total > 2 * log.count_kind(TransactionKind::Undo)
    }

    /// Whether a redo is possible
    pub fn can_redo<T: TrackedObject>(log: &TransactionLog<T>) -> bool {
        let skip = 2 * log.leading_run(0, TransactionKind::Redo);
        let undone = log
            .iter()
            .skip(skip)
            .take_while(|record| record.kind() == TransactionKind::Undo && record.is_active())
            .count();
        undone > 0
    }

    /// Position of the next record to revert
    ///
    /// Runs of `skip_kind` records are stepped over together with the records
    /// they reverted; the first other record satisfying `eligible` is returned.
    pub fn find_next_to_revert<T, F>(
        log: &TransactionLog<T>,
        skip_kind: TransactionKind,
        eligible: F,
    ) -> DbResult<usize>
    where
        T: TrackedObject,
        F: Fn(&TransactionRecord<T>) -> bool,
    {
        let mut index = 0;
        while let Some(record) = log.get(index) {
            if record.kind() == skip_kind {
                index += 2 * log.leading_run(index, skip_kind);
            } else if eligible(record) {
                return Ok(index);
            } else {
                index += 1;
            }
        }

        let reason = format!("no eligible record in a log of {} entries", log.len());
        Err(match skip_kind {
            TransactionKind::Redo => DbError::cannot_redo(reason),
            _ => DbError::cannot_undo(reason),
        })
    }

    /// Revert the most recent undoable change
    pub fn undo<T: TrackedObject>(log: &mut TransactionLog<T>, live: &mut LiveSet<T>) -> DbResult<()> {
        if !Self::can_undo(log) {
            return Err(DbError::cannot_undo("nothing to undo"));
        }
        let index = Self::find_next_to_revert(log, TransactionKind::Undo, |record| record.is_active())?;
        Self::revert_at(log, live, index)
    }

    /// Re-apply the most recently undone change
    pub fn redo<T: TrackedObject>(log: &mut TransactionLog<T>, live: &mut LiveSet<T>) -> DbResult<()> {
        if !Self::can_redo(log) {
            return Err(DbError::cannot_redo("nothing to redo"));
        }
        let index = Self::find_next_to_revert(log, TransactionKind::Redo, |record| record.is_active())?;
        Self::revert_at(log, live, index)
    }

    fn revert_at<T: TrackedObject>(
        log: &mut TransactionLog<T>,
        live: &mut LiveSet<T>,
        index: usize,
    ) -> DbResult<()> {
        let record = log
            .records
            .get_mut(index)
            .ok_or_else(|| DbError::invalid_record(format!("no record at position {}", index)))?;
        let inverse = record.revert(live)?;
        info!(
            "{} of {} record {} applied",
            inverse.kind(),
            record.kind(),
            record.id()
        );
        log.prepend(inverse);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldSpec, FieldStore, SetOptions};
    use crate::transaction::FieldChange;

    const COUNT: Field<i32> = Field::new("Count");
    static SCHEMA: &[FieldSpec] = &[COUNT.spec()];

    struct Counter {
        fields: FieldStore,
    }

    impl TrackedObject for Counter {
        fn fields(&self) -> &FieldStore {
            &self.fields
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            fields: FieldStore::new(SCHEMA),
        })
    }

    /// Edit the counter and log the edit the way a database would
    fn edit(log: &mut TransactionLog<Counter>, item: &Counter, value: i32) {
        let old = COUNT.get(item.fields());
        COUNT.set_with(item.fields(), value, SetOptions::silent()).unwrap();
        log.prepend(TransactionRecord::modified(
            item.identifier(),
            FieldChange {
                path: "Count".to_string(),
                old_value: serde_json::json!(old),
                new_value: serde_json::json!(value),
            },
        ));
    }

    fn kinds(log: &TransactionLog<Counter>) -> Vec<TransactionKind> {
        log.iter().map(|record| record.kind()).collect()
    }

    #[test]
    fn test_empty_log_cannot_undo_or_redo() {
        let log: TransactionLog<Counter> = TransactionLog::new();
        assert!(!UndoRedo::can_undo(&log));
        assert!(!UndoRedo::can_redo(&log));
    }

    #[test]
    fn test_add_undo_redo_cycle() {
        let mut live = LiveSet::new();
        let mut log = TransactionLog::new();
        let item = counter();
        live.push(Arc::clone(&item)).unwrap();
        log.prepend(TransactionRecord::added(Arc::clone(&item), 0));

        UndoRedo::undo(&mut log, &mut live).unwrap();
        assert!(live.is_empty());
        assert!(!UndoRedo::can_undo(&log));
        assert!(UndoRedo::can_redo(&log));

        UndoRedo::redo(&mut log, &mut live).unwrap();
        assert!(live.contains(item.identifier()));
        assert!(UndoRedo::can_undo(&log));
        assert!(!UndoRedo::can_redo(&log));
        assert_eq!(
            kinds(&log),
            vec![TransactionKind::Redo, TransactionKind::Undo, TransactionKind::Add]
        );
    }

    #[test]
    fn test_edits_undo_then_redo_in_order() {
        let mut live = LiveSet::new();
        let mut log = TransactionLog::new();
        let item = counter();
        live.push(Arc::clone(&item)).unwrap();
        for value in 1..=3 {
            edit(&mut log, &item, value);
        }

        for expected in [2, 1, 0] {
            UndoRedo::undo(&mut log, &mut live).unwrap();
            assert_eq!(COUNT.get(item.fields()), expected);
        }
        assert!(!UndoRedo::can_undo(&log));
        assert!(matches!(
            UndoRedo::undo(&mut log, &mut live),
            Err(DbError::CannotUndo(_))
        ));

        for expected in [1, 2, 3] {
            UndoRedo::redo(&mut log, &mut live).unwrap();
            assert_eq!(COUNT.get(item.fields()), expected);
        }
        assert!(!UndoRedo::can_redo(&log));
        assert!(matches!(
            UndoRedo::redo(&mut log, &mut live),
            Err(DbError::CannotRedo(_))
        ));
    }

    #[test]
    fn test_new_edit_after_undo_blocks_redo() {
        let mut live = LiveSet::new();
        let mut log = TransactionLog::new();
        let item = counter();
        live.push(Arc::clone(&item)).unwrap();
        edit(&mut log, &item, 1);
        UndoRedo::undo(&mut log, &mut live).unwrap();
        edit(&mut log, &item, 5);

        assert!(!UndoRedo::can_redo(&log));
        UndoRedo::undo(&mut log, &mut live).unwrap();
        assert_eq!(COUNT.get(item.fields()), 0);
    }

    #[test]
    fn test_can_undo_counts_undo_records_across_whole_log() {
        let mut live = LiveSet::new();
        let mut log = TransactionLog::new();
        let item = counter();
        live.push(Arc::clone(&item)).unwrap();

        edit(&mut log, &item, 1);
        edit(&mut log, &item, 2);
        UndoRedo::undo(&mut log, &mut live).unwrap();
        UndoRedo::undo(&mut log, &mut live).unwrap();
        edit(&mut log, &item, 3);
        UndoRedo::undo(&mut log, &mut live).unwrap();
        assert_eq!(COUNT.get(item.fields()), 0);

        // [Undo, Modify, Undo, Undo, Modify, Modify]: the leading Undo run is 1,
        // so a leading-run count would report 6 > 2, but all three edits are
        // undone and the global count (6 > 6) correctly refuses.
        assert_eq!(log.leading_run(0, TransactionKind::Undo), 1);
        assert_eq!(log.count_kind(TransactionKind::Undo), 3);
        assert!(!UndoRedo::can_undo(&log));
        assert!(matches!(
            UndoRedo::find_next_to_revert(&log, TransactionKind::Undo, |r| r.is_active()),
            Err(DbError::CannotUndo(_))
        ));

        // The undone third edit is the only thing left to redo.
        assert!(UndoRedo::can_redo(&log));
        UndoRedo::redo(&mut log, &mut live).unwrap();
        assert_eq!(COUNT.get(item.fields()), 3);
        assert!(!UndoRedo::can_redo(&log));
    }

    #[test]
    fn test_can_undo_after_partial_redo() {
        let mut live = LiveSet::new();
        let mut log = TransactionLog::new();
        let item = counter();
        live.push(Arc::clone(&item)).unwrap();
        for value in 1..=3 {
            edit(&mut log, &item, value);
        }
        for _ in 0..3 {
            UndoRedo::undo(&mut log, &mut live).unwrap();
        }

        // [Redo, Undo, Undo, Undo, Modify, Modify, Modify]: 7 > 2 × 3
        UndoRedo::redo(&mut log, &mut live).unwrap();
        assert_eq!(COUNT.get(item.fields()), 1);
        assert!(UndoRedo::can_undo(&log));

        // Undoing the redo brings the count to 8 records and 4 Undo records
        UndoRedo::undo(&mut log, &mut live).unwrap();
        assert_eq!(COUNT.get(item.fields()), 0);
        assert!(!UndoRedo::can_undo(&log));
        assert!(UndoRedo::can_redo(&log));
    }

    #[test]
    fn test_find_next_skips_paired_runs() {
        let mut live = LiveSet::new();
        let mut log = TransactionLog::new();
        let item = counter();
        live.push(Arc::clone(&item)).unwrap();
        edit(&mut log, &item, 1);
        edit(&mut log, &item, 2);
        UndoRedo::undo(&mut log, &mut live).unwrap();

        // [Undo, Modify(2, inactive), Modify(1)]
        let next = UndoRedo::find_next_to_revert(&log, TransactionKind::Undo, |r| r.is_active());
        assert_eq!(next.unwrap(), 2);
        let next = UndoRedo::find_next_to_revert(&log, TransactionKind::Redo, |r| r.is_active());
        assert_eq!(next.unwrap(), 0);
    }

    #[test]
    fn test_history_paging_and_lookup() {
        let mut log = TransactionLog::new();
        let item = counter();
        for value in 1..=5 {
            edit(&mut log, &item, value);
        }
        let page = log.history(2, 1);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].new_value(), Some(&serde_json::json!(4)));
        assert_eq!(page[1].new_value(), Some(&serde_json::json!(3)));
        assert_eq!(log.records_for_item(item.identifier()).len(), 5);

        let head_id = log.head().map(|r| r.id().to_string()).unwrap();
        assert_eq!(log.find(&head_id).and_then(|r| r.new_value()), Some(&serde_json::json!(5)));
        assert!(log.find("missing").is_none());
    }
}
