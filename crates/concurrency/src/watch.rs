//! Query invalidation: one-shot watch handles and the registry that fires them
//!
//! A watch is keyed by `(table, index, key prefix)` plus the revision of the
//! snapshot the query ran against. A commit fires every watch of a touched
//! table whose index saw a removed or inserted tree key starting with the
//! watch's prefix. Above the per-table touched-key limit the commit stops
//! recording keys and fires every watch of that table instead.
//!
//! Registration and notification serialize on the registry lock. Each table
//! remembers the revision of its last modification, so a watch registered
//! against an already stale snapshot fires immediately.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Default)]
struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn fire(&self) {
        let mut fired = self.fired.lock();
        if !*fired {
            *fired = true;
            self.cond.notify_all();
        }
    }
}

/// One-shot notification that a query's results may have changed
///
/// Clones share the same signal; any number of threads may wait on it.
#[derive(Debug, Clone, Default)]
pub struct WatchHandle {
    signal: Arc<Signal>,
}

impl WatchHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Check without blocking
    pub fn is_fired(&self) -> bool {
        *self.signal.fired.lock()
    }

    /// Block until fired
    pub fn wait(&self) {
        let mut fired = self.signal.fired.lock();
        while !*fired {
            self.signal.cond.wait(&mut fired);
        }
    }

    /// Block until fired or `timeout` elapses; returns whether it fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_deadline(Instant::now() + timeout)
    }

    /// Block until fired or `deadline` passes; returns whether it fired
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut fired = self.signal.fired.lock();
        while !*fired {
            if self.signal.cond.wait_until(&mut fired, deadline).timed_out() {
                return *fired;
            }
        }
        true
    }
}

/// Keys touched by one write transaction, grouped by table
#[derive(Debug, Default)]
pub struct TouchedKeys {
    tables: FxHashMap<usize, TableTouch>,
}

#[derive(Debug, Default)]
struct TableTouch {
    keys: Vec<(usize, Vec<u8>)>,
    overflow: bool,
}

impl TouchedKeys {
    /// Record a removed or inserted tree key
    ///
    /// Once a table exceeds `limit` keys the table is marked as wholly
    /// touched and its keys are dropped.
    pub fn record(&mut self, table: usize, index: usize, key: &[u8], limit: usize) {
        let touch = self.tables.entry(table).or_default();
        if touch.overflow {
            return;
        }
        if touch.keys.len() >= limit {
            touch.overflow = true;
            touch.keys = Vec::new();
            return;
        }
        touch.keys.push((index, key.to_vec()));
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Whether `table` was marked as wholly touched
    pub fn overflowed(&self, table: usize) -> bool {
        self.tables.get(&table).map_or(false, |t| t.overflow)
    }

    fn matches(touch: &TableTouch, index: usize, prefix: &[u8]) -> bool {
        touch.overflow
            || touch
                .keys
                .iter()
                .any(|(i, key)| *i == index && key.starts_with(prefix))
    }
}

struct WatchEntry {
    index: usize,
    prefix: Vec<u8>,
    revision: u64,
    signal: Weak<Signal>,
}

/// Entry count below which `register` never prunes
const PRUNE_FLOOR: usize = 32;

#[derive(Default)]
struct TableWatches {
    modified: u64,
    entries: Vec<WatchEntry>,
    /// Entry count left by the last prune
    pruned_len: usize,
}

impl TableWatches {
    /// Drop entries whose handles are gone once the list has doubled
    fn maybe_prune(&mut self) {
        if self.entries.len() < PRUNE_FLOOR.max(self.pruned_len * 2) {
            return;
        }
        self.entries.retain(|entry| entry.signal.strong_count() > 0);
        self.pruned_len = self.entries.len();
    }
}

/// Outstanding watches of every table
pub struct WatchRegistry {
    tables: Mutex<Vec<TableWatches>>,
}

impl WatchRegistry {
    /// Registry for `table_count` tables, all unmodified since revision 0
    pub fn new(table_count: usize) -> Self {
        Self {
            tables: Mutex::new((0..table_count).map(|_| TableWatches::default()).collect()),
        }
    }

    /// Watch `(table, index, prefix)` for commits after `revision`
    pub fn register(&self, table: usize, index: usize, prefix: Vec<u8>, revision: u64) -> WatchHandle {
        let handle = WatchHandle::new();
        let mut tables = self.tables.lock();
        let watches = &mut tables[table];
        if watches.modified > revision {
            trace!(
                target: "memstate::watch",
                table,
                index,
                revision,
                modified = watches.modified,
                "Watch registered on stale snapshot, firing"
            );
            handle.signal.fire();
            return handle;
        }
        watches.maybe_prune();
        watches.entries.push(WatchEntry {
            index,
            prefix,
            revision,
            signal: Arc::downgrade(&handle.signal),
        });
        handle
    }

    /// Fire the watches affected by a commit published at `revision`
    ///
    /// Returns the number of watches fired.
    pub fn notify(&self, revision: u64, touched: &TouchedKeys) -> usize {
        let mut fired = 0;
        let mut tables = self.tables.lock();
        for (&table, touch) in &touched.tables {
            let watches = &mut tables[table];
            watches.modified = watches.modified.max(revision);
            watches.entries.retain(|entry| {
                let Some(signal) = entry.signal.upgrade() else {
                    return false;
                };
                if revision > entry.revision
                    && TouchedKeys::matches(touch, entry.index, &entry.prefix)
                {
                    signal.fire();
                    fired += 1;
                    return false;
                }
                true
            });
            watches.pruned_len = watches.entries.len();
        }
        if fired > 0 {
            trace!(target: "memstate::watch", revision, fired, "Watches fired");
        }
        fired
    }

    /// Number of registered, unfired watches whose handle is still alive
    pub fn pending(&self) -> usize {
        self.tables
            .lock()
            .iter()
            .flat_map(|t| t.entries.iter())
            .filter(|e| e.signal.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("pending", &self.pending())
            .finish()
    }
}
