//! Result iterators over a transaction's view of one index
//!
//! Iterators own their position in the persistent trees, so they outlive the
//! borrow of the transaction that produced them and never observe later
//! writes. Each iterator can hand out a [`WatchHandle`] that fires when a
//! later commit may have changed the query's results.

use crate::watch::{WatchHandle, WatchRegistry};
use memstate_core::{downcast, Object};
use memstate_storage::{Iter as TreeIter, RevIter as TreeRevIter};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

enum Cursor {
    Forward(TreeIter<Object>),
    Reverse(TreeRevIter<Object>),
}

/// What a query's watch covers
pub(crate) struct WatchTarget {
    pub(crate) registry: Arc<WatchRegistry>,
    pub(crate) table: usize,
    pub(crate) index: usize,
    pub(crate) prefix: Vec<u8>,
    pub(crate) revision: u64,
}

/// Type-erased lazy result sequence
///
/// Yields records in index key order (descending for reverse queries) and
/// returns `None` once exhausted. Not restartable.
pub struct ResultIter {
    cursor: Cursor,
    target: WatchTarget,
    watch: Option<WatchHandle>,
}

impl ResultIter {
    pub(crate) fn forward(iter: TreeIter<Object>, target: WatchTarget) -> Self {
        Self {
            cursor: Cursor::Forward(iter),
            target,
            watch: None,
        }
    }

    pub(crate) fn reverse(iter: TreeRevIter<Object>, target: WatchTarget) -> Self {
        Self {
            cursor: Cursor::Reverse(iter),
            target,
            watch: None,
        }
    }

    /// Handle that fires once a later commit touches this query's key range
    ///
    /// The watch is registered on the first call; later calls return clones
    /// of the same handle.
    pub fn invalidated(&mut self) -> WatchHandle {
        let target = &self.target;
        self.watch
            .get_or_insert_with(|| {
                target.registry.register(
                    target.table,
                    target.index,
                    target.prefix.clone(),
                    target.revision,
                )
            })
            .clone()
    }
}

impl Iterator for ResultIter {
    type Item = Object;

    fn next(&mut self) -> Option<Object> {
        match &mut self.cursor {
            Cursor::Forward(it) => it.next().map(|e| e.into_value()),
            Cursor::Reverse(it) => it.next().map(|e| e.into_value()),
        }
    }
}

impl std::fmt::Debug for ResultIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultIter")
            .field("table", &self.target.table)
            .field("index", &self.target.index)
            .field("revision", &self.target.revision)
            .finish()
    }
}

/// Typed result sequence returned by [`crate::Table`] queries
pub struct Iter<T> {
    inner: ResultIter,
    _record: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Iter<T> {
    pub(crate) fn new(inner: ResultIter) -> Self {
        Self {
            inner,
            _record: PhantomData,
        }
    }

    /// See [`ResultIter::invalidated`]
    pub fn invalidated(&mut self) -> WatchHandle {
        self.inner.invalidated()
    }
}

impl<T: Any + Send + Sync> Iterator for Iter<T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Arc<T>> {
        // The table's record type was checked when the handle was created.
        loop {
            if let Some(record) = downcast(self.inner.next()?) {
                return Some(record);
            }
        }
    }
}
