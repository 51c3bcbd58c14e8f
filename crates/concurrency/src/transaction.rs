//! Read and write transactions
//!
//! A transaction pins one published [`Root`] for its whole life. A write
//! transaction also holds the global write gate and keeps private
//! copy-on-write versions of every table it modified; reads through a write
//! transaction see those private versions (read-your-writes).
//!
//! ## Lifecycle
//!
//! ```text
//! begin ─┬─ commit ──> reflector ──> publish ──> release gate ──> deferred ──> watches
//!        ├─ abort  ──> release gate (private copies dropped)
//!        └─ drop   ──> same as abort
//! ```

use crate::iter::{Iter, ResultIter, WatchTarget};
use crate::manager::{GateGuard, TransactionManager};
use crate::reflector::{ChangeTracker, Changes, Reflector};
use crate::watch::TouchedKeys;
use memstate_core::{Error, IndexDef, Object, Query, Result, TableDef};
use memstate_storage::{id_key, Root, TableIndexes};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) type Deferred = Box<dyn FnOnce() + Send + 'static>;

/// Private state of a write transaction
pub(crate) struct WriteContext {
    pub(crate) gate: GateGuard,
    pub(crate) tables: FxHashMap<usize, TableIndexes>,
    pub(crate) changes: ChangeTracker,
    pub(crate) touched: TouchedKeys,
    pub(crate) deferred: Vec<Deferred>,
    pub(crate) reflector: Option<Arc<dyn Reflector>>,
}

impl WriteContext {
    pub(crate) fn new(gate: GateGuard, reflector: Option<Arc<dyn Reflector>>) -> Self {
        Self {
            gate,
            tables: FxHashMap::default(),
            changes: ChangeTracker::default(),
            touched: TouchedKeys::default(),
            deferred: Vec::new(),
            reflector,
        }
    }
}

/// A read or write transaction
///
/// Obtained from [`TransactionManager::begin_read`] or
/// [`TransactionManager::begin_write`]. Dropping an uncommitted write
/// transaction aborts it.
pub struct Transaction {
    id: u64,
    manager: Arc<TransactionManager>,
    root: Arc<Root>,
    write: Option<WriteContext>,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        manager: Arc<TransactionManager>,
        root: Arc<Root>,
        write: Option<WriteContext>,
    ) -> Self {
        Self {
            id,
            manager,
            root,
            write,
        }
    }

    /// Transaction id, unique per store
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Revision of the snapshot this transaction reads from
    pub fn revision(&self) -> u64 {
        self.root.revision()
    }

    /// Whether this transaction may mutate
    pub fn is_write(&self) -> bool {
        self.write.is_some()
    }

    /// Typed handle on the table `name`
    ///
    /// Fails with `TableNotFound` for unknown tables and `TypeMismatch` when
    /// the table holds records of another type.
    pub fn table<T: Any + Send + Sync>(&mut self, name: &str) -> Result<Table<'_, T>> {
        let (_, def) = self.manager.table(name)?;
        if !def.record_type().is::<T>() {
            return Err(Error::TypeMismatch {
                table: name.to_string(),
                stored: def.record_type().name(),
                requested: std::any::type_name::<T>(),
            });
        }
        Ok(Table {
            tx: self,
            name: name.to_string(),
            _record: PhantomData,
        })
    }

    /// First record matching `query`, in index order
    pub fn first(&self, table: &str, query: &Query) -> Result<Option<Object>> {
        Ok(self.get(table, query)?.next())
    }

    /// Last record matching `query`, in index order
    pub fn last(&self, table: &str, query: &Query) -> Result<Option<Object>> {
        Ok(self.get_reverse(table, query)?.next())
    }

    /// All records matching `query`, ascending
    pub fn get(&self, table: &str, query: &Query) -> Result<ResultIter> {
        let (pos, def) = self.manager.table(table)?;
        let (index, key) = query_key(def, query)?;
        let iter = self.view(pos).tree(index).iter_prefix(&key);
        Ok(ResultIter::forward(iter, self.watch_target(pos, index, key)))
    }

    /// All records matching `query`, descending
    pub fn get_reverse(&self, table: &str, query: &Query) -> Result<ResultIter> {
        let (pos, def) = self.manager.table(table)?;
        let (index, key) = query_key(def, query)?;
        let iter = self.view(pos).tree(index).iter_prefix_rev(&key);
        Ok(ResultIter::reverse(iter, self.watch_target(pos, index, key)))
    }

    /// Records from the first key `>=` the query key to the end of the index
    pub fn lower_bound(&self, table: &str, query: &Query) -> Result<ResultIter> {
        let (pos, def) = self.manager.table(table)?;
        let (index, key) = query_key(def, query)?;
        let iter = self.view(pos).tree(index).iter_from(&key);
        Ok(ResultIter::forward(
            iter,
            self.watch_target(pos, index, Vec::new()),
        ))
    }

    /// Number of records in `table`
    pub fn len(&self, table: &str) -> Result<usize> {
        let (pos, _) = self.manager.table(table)?;
        Ok(self.view(pos).len())
    }

    /// Insert `object`, replacing any record with the same `id`
    ///
    /// On error the transaction is unchanged.
    pub fn insert(&mut self, table: &str, object: Object) -> Result<()> {
        let manager = Arc::clone(&self.manager);
        let (pos, def) = manager.table(table)?;
        if !def.record_type().matches(&*object) {
            return Err(Error::TypeMismatch {
                table: table.to_string(),
                stored: def.record_type().name(),
                requested: "unregistered record type",
            });
        }
        let limit = manager.watch_key_limit();
        let root = &self.root;
        let write = self.write.as_mut().ok_or(Error::ReadOnly)?;
        let id = id_key(def, &*object)?;

        let WriteContext {
            tables,
            changes,
            touched,
            ..
        } = write;
        let indexes = tables
            .entry(pos)
            .or_insert_with(|| root.table(pos).clone());
        let previous = indexes.insert(def, Arc::clone(&object), |index, key| {
            touched.record(pos, index, key, limit)
        })?;
        changes.record(pos, def.name(), id, previous, Some(object));
        Ok(())
    }

    /// Delete the stored record with the same `id` as `record`
    ///
    /// Returns `false`, and changes nothing, when no such record exists.
    pub fn delete(&mut self, table: &str, record: &(dyn Any + Send + Sync)) -> Result<bool> {
        let manager = Arc::clone(&self.manager);
        let (pos, def) = manager.table(table)?;
        let limit = manager.watch_key_limit();
        let root = &self.root;
        let write = self.write.as_mut().ok_or(Error::ReadOnly)?;
        let id = id_key(def, record)?;

        let WriteContext {
            tables,
            changes,
            touched,
            ..
        } = write;
        let current = tables.get(&pos).unwrap_or_else(|| root.table(pos));
        if current.get_by_id(&id).is_none() {
            return Ok(false);
        }
        let indexes = tables
            .entry(pos)
            .or_insert_with(|| root.table(pos).clone());
        let removed = indexes.delete(def, &id, |index, key| {
            touched.record(pos, index, key, limit)
        })?;
        match removed {
            Some(stored) => {
                changes.record(pos, def.name(), id, Some(stored), None);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every record matching `query`; returns how many were deleted
    pub fn delete_all(&mut self, table: &str, query: &Query) -> Result<usize> {
        if self.write.is_none() {
            return Err(Error::ReadOnly);
        }
        let matched: Vec<Object> = self.get(table, query)?.collect();
        let mut deleted = 0;
        for object in &matched {
            if self.delete(table, &**object)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Run `callback` after a successful commit
    ///
    /// Callbacks run in registration order, after publication and after the
    /// write gate is released. They are dropped on abort or veto.
    pub fn defer(&mut self, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        let write = self.write.as_mut().ok_or(Error::ReadOnly)?;
        write.deferred.push(Box::new(callback));
        Ok(())
    }

    /// Coalesced changes made so far
    pub fn changes(&self) -> Changes {
        self.write
            .as_ref()
            .map(|w| w.changes.to_changes())
            .unwrap_or_default()
    }

    /// Commit and return the resulting revision
    ///
    /// A read transaction, or a write transaction without net changes,
    /// returns its snapshot revision and publishes nothing.
    pub fn commit(mut self) -> Result<u64> {
        match self.write.take() {
            Some(write) => self.manager.commit(self.id, &self.root, write),
            None => Ok(self.root.revision()),
        }
    }

    /// Discard all changes
    pub fn abort(mut self) {
        if let Some(write) = self.write.take() {
            self.manager.abort(self.id, write);
        }
    }

    fn view(&self, pos: usize) -> &TableIndexes {
        self.write
            .as_ref()
            .and_then(|w| w.tables.get(&pos))
            .unwrap_or_else(|| self.root.table(pos))
    }

    fn watch_target(&self, table: usize, index: usize, prefix: Vec<u8>) -> WatchTarget {
        WatchTarget {
            registry: self.manager.watches(),
            table,
            index,
            prefix,
            revision: self.root.revision(),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(write) = self.write.take() {
            self.manager.abort(self.id, write);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("revision", &self.root.revision())
            .field("write", &self.is_write())
            .finish()
    }
}

/// Resolve a query to `(index position, search key)`
///
/// [`Query::all`] addresses the whole index.
fn query_key(def: &TableDef, query: &Query) -> Result<(usize, Vec<u8>)> {
    let (pos, idx) = def
        .index(query.index())
        .ok_or_else(|| Error::IndexNotFound {
            table: def.name().to_string(),
            index: query.index().to_string(),
        })?;
    if query.is_scan() {
        return Ok((pos, Vec::new()));
    }
    let key = encode_args(idx, query).map_err(|e| e.into_argument(idx.name()))?;
    Ok((pos, key))
}

fn encode_args(idx: &IndexDef, query: &Query) -> memstate_core::KeyResult<Vec<u8>> {
    if query.is_prefix() {
        idx.indexer().prefix_from_args(query.args())
    } else {
        idx.indexer().from_args(query.args())
    }
}

/// Typed view of one table inside a transaction
pub struct Table<'a, T> {
    tx: &'a mut Transaction,
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T: Any + Send + Sync> Table<'a, T> {
    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First matching record; `None` when nothing matches
    pub fn first(&self, query: &Query) -> Result<Option<Arc<T>>> {
        Ok(self.get(query)?.next())
    }

    /// Last matching record; `None` when nothing matches
    pub fn last(&self, query: &Query) -> Result<Option<Arc<T>>> {
        Ok(self.get_reverse(query)?.next())
    }

    /// Matching records in ascending index order
    pub fn get(&self, query: &Query) -> Result<Iter<T>> {
        self.tx.get(&self.name, query).map(Iter::new)
    }

    /// Matching records in descending index order
    pub fn get_reverse(&self, query: &Query) -> Result<Iter<T>> {
        self.tx.get_reverse(&self.name, query).map(Iter::new)
    }

    /// Records from the query key to the end of the index
    pub fn lower_bound(&self, query: &Query) -> Result<Iter<T>> {
        self.tx.lower_bound(&self.name, query).map(Iter::new)
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        self.tx.len(&self.name)
    }

    /// Whether the table holds no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Insert or replace a record
    pub fn insert(&mut self, record: impl Into<Arc<T>>) -> Result<()> {
        let record: Arc<T> = record.into();
        self.tx.insert(&self.name, record)
    }

    /// Delete the record with the same `id`; `false` if there was none
    pub fn delete(&mut self, record: &T) -> Result<bool> {
        self.tx.delete(&self.name, record)
    }

    /// Delete every matching record
    pub fn delete_all(&mut self, query: &Query) -> Result<usize> {
        self.tx.delete_all(&self.name, query)
    }
}
