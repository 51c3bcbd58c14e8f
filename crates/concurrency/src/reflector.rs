//! Change reflection: the commit-time hook and the change sets it receives
//!
//! A write transaction records every insert, update and delete. Mutations of
//! the same record (same table and `id` key) are coalesced: the change keeps
//! the first `before` and the last `after`, and an insert later deleted in
//! the same transaction disappears. Changes are ordered by the first mutation
//! of each record.

use memstate_core::{downcast, BoxError, Object};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Hook consulted during commit, before publication
///
/// Returning an error vetoes the commit: nothing is published and the error
/// is returned from `commit` as [`memstate_core::Error::Reflector`].
pub trait Reflector: Send + Sync {
    /// Inspect the transaction's changes
    fn process_changes(&self, changes: &Changes) -> Result<(), BoxError>;
}

impl<F> Reflector for F
where
    F: Fn(&Changes) -> Result<(), BoxError> + Send + Sync,
{
    fn process_changes(&self, changes: &Changes) -> Result<(), BoxError> {
        self(changes)
    }
}

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Inserted with a new `id`
    Created,
    /// Replaced a record with the same `id`
    Updated,
    /// Removed
    Deleted,
}

/// Net change to one record
#[derive(Clone)]
pub struct Change {
    table: Arc<str>,
    before: Option<Object>,
    after: Option<Object>,
}

impl Change {
    /// Table the record belongs to
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Record as of the transaction's snapshot, `None` if created
    pub fn before(&self) -> Option<&Object> {
        self.before.as_ref()
    }

    /// Record as committed, `None` if deleted
    pub fn after(&self) -> Option<&Object> {
        self.after.as_ref()
    }

    /// Typed view of [`Change::before`]
    pub fn before_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.before.clone().and_then(downcast)
    }

    /// Typed view of [`Change::after`]
    pub fn after_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.after.clone().and_then(downcast)
    }

    /// Kind of change
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, _) => ChangeKind::Created,
            (Some(_), Some(_)) => ChangeKind::Updated,
            (Some(_), None) => ChangeKind::Deleted,
        }
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("table", &self.table)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Ordered, coalesced changes of one transaction
#[derive(Debug, Clone, Default)]
pub struct Changes {
    items: Vec<Change>,
}

impl Changes {
    /// Number of changed records
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no record changed
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All changes in first-mutation order
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.items.iter()
    }

    /// Changes of one table, in first-mutation order
    pub fn for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Change> + 'a {
        self.items.iter().filter(move |c| c.table() == table)
    }
}

impl<'a> IntoIterator for &'a Changes {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Per-transaction change log
#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    slots: Vec<Option<Change>>,
    by_record: FxHashMap<(usize, Vec<u8>), usize>,
}

impl ChangeTracker {
    /// Record one mutation of the record `(table, id_key)`
    pub(crate) fn record(
        &mut self,
        table: usize,
        table_name: &str,
        id_key: Vec<u8>,
        before: Option<Object>,
        after: Option<Object>,
    ) {
        let record = (table, id_key);
        if let Some(&slot) = self.by_record.get(&record) {
            let vanished = match &mut self.slots[slot] {
                Some(change) => {
                    change.after = after;
                    change.before.is_none() && change.after.is_none()
                }
                None => false,
            };
            if vanished {
                self.slots[slot] = None;
                self.by_record.remove(&record);
            }
            return;
        }
        self.by_record.insert(record, self.slots.len());
        self.slots.push(Some(Change {
            table: Arc::from(table_name),
            before,
            after,
        }));
    }

    pub(crate) fn to_changes(&self) -> Changes {
        Changes {
            items: self.slots.iter().flatten().cloned().collect(),
        }
    }
}
