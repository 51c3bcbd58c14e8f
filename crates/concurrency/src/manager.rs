//! Transaction manager: write gate, publication and commit protocol
//!
//! Writers are serialized by a single store-wide gate; readers never take it.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Call the reflector captured at begin, even with no changes; an error
//!    aborts and is returned
//! 2. Publish root with revision + 1 (the visibility point)
//! 3. Release the write gate
//! 4. Run deferred callbacks in registration order
//! 5. Fire affected watches
//! 6. Return the new revision
//! ```
//!
//! Watches fire even when a deferred callback panics.
//!
//! A vetoed or aborted transaction publishes nothing; its private table
//! copies are dropped with it.

use crate::reflector::Reflector;
use crate::transaction::{Transaction, WriteContext};
use crate::watch::{TouchedKeys, WatchRegistry};
use memstate_core::{Error, Result, Schema, TableDef};
use memstate_storage::{Root, SnapshotStore};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tunables of the transaction manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Touched keys recorded per table before watches fire table-wide
    pub watch_key_limit: usize,
    /// Reflector calls slower than this are logged
    pub slow_reflector: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            watch_key_limit: 4096,
            slow_reflector: Duration::from_millis(100),
        }
    }
}

/// Store-wide writer exclusion
#[derive(Debug, Default)]
pub(crate) struct WriteGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriteGate {
    fn acquire(self: &Arc<Self>) -> GateGuard {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
        GateGuard(Arc::clone(self))
    }
}

/// Releases the write gate when dropped
#[derive(Debug)]
pub(crate) struct GateGuard(Arc<WriteGate>);

impl Drop for GateGuard {
    fn drop(&mut self) {
        let mut held = self.0.held.lock();
        *held = false;
        self.0.released.notify_one();
    }
}

/// Coordinates transactions over one schema
///
/// Holds the published root, the write gate, the watch registry, the
/// current reflector and lifecycle metrics.
///
/// # Memory Ordering
///
/// Metric counters use Relaxed ordering; they are observational only.
pub struct TransactionManager {
    schema: Schema,
    snapshots: SnapshotStore,
    gate: Arc<WriteGate>,
    watches: Arc<WatchRegistry>,
    reflector: RwLock<Option<Arc<dyn Reflector>>>,
    options: ManagerOptions,
    next_txn_id: AtomicU64,
    total_reads: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
}

impl TransactionManager {
    /// Manager over a validated schema, starting at revision 0
    pub fn new(schema: Schema, options: ManagerOptions) -> Self {
        Self {
            snapshots: SnapshotStore::new(&schema),
            watches: Arc::new(WatchRegistry::new(schema.tables().len())),
            schema,
            gate: Arc::new(WriteGate::default()),
            reflector: RwLock::new(None),
            options,
            next_txn_id: AtomicU64::new(1),
            total_reads: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    /// The schema this manager was built from
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Position and definition of table `name`
    pub fn table(&self, name: &str) -> Result<(usize, &TableDef)> {
        self.schema
            .table(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Latest committed revision
    pub fn revision(&self) -> u64 {
        self.snapshots.revision()
    }

    /// Latest committed root
    pub fn snapshot(&self) -> Arc<Root> {
        self.snapshots.snapshot()
    }

    /// Replace the reflector; transactions already begun keep theirs
    pub fn set_reflector(&self, reflector: Arc<dyn Reflector>) {
        *self.reflector.write() = Some(reflector);
    }

    /// Remove the reflector
    pub fn clear_reflector(&self) {
        *self.reflector.write() = None;
    }

    /// Start a read transaction on the latest committed root
    pub fn begin_read(self: &Arc<Self>) -> Transaction {
        let root = self.snapshots.snapshot();
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        self.total_reads.fetch_add(1, Ordering::Relaxed);
        Transaction::new(id, Arc::clone(self), root, None)
    }

    /// Start a write transaction, waiting for the write gate
    ///
    /// The gate is not reentrant: a thread that already holds a write
    /// transaction of this manager must not begin another.
    pub fn begin_write(self: &Arc<Self>) -> Transaction {
        let gate = self.gate.acquire();
        let root = self.snapshots.snapshot();
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "memstate::txn", txn_id = id, revision = root.revision(), "Write transaction started");
        let reflector = self.reflector.read().clone();
        Transaction::new(
            id,
            Arc::clone(self),
            root,
            Some(WriteContext::new(gate, reflector)),
        )
    }

    pub(crate) fn watch_key_limit(&self) -> usize {
        self.options.watch_key_limit
    }

    pub(crate) fn watches(&self) -> Arc<WatchRegistry> {
        Arc::clone(&self.watches)
    }

    pub(crate) fn commit(&self, txn_id: u64, root: &Root, write: WriteContext) -> Result<u64> {
        let WriteContext {
            gate,
            tables,
            changes,
            touched,
            deferred,
            reflector,
        } = write;

        let changes = changes.to_changes();
        if let Some(reflector) = reflector {
            let started = Instant::now();
            let outcome = reflector.process_changes(&changes);
            let elapsed = started.elapsed();
            if elapsed > self.options.slow_reflector {
                warn!(
                    target: "memstate::txn",
                    txn_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    changes = changes.len(),
                    "Slow reflector"
                );
            }
            if let Err(source) = outcome {
                drop(gate);
                self.total_aborted.fetch_add(1, Ordering::Relaxed);
                warn!(target: "memstate::txn", txn_id, error = %source, "Commit vetoed by reflector");
                return Err(Error::Reflector(source));
            }
        }

        let published = self.snapshots.publish(root.next(tables));
        let revision = published.revision();
        drop(gate);

        let notify = PendingNotify {
            watches: &self.watches,
            revision,
            touched: Some(touched),
        };
        for callback in deferred {
            callback();
        }
        let fired = notify.finish();

        self.total_committed.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "memstate::txn",
            txn_id,
            revision,
            changes = changes.len(),
            watches_fired = fired,
            "Transaction committed"
        );
        Ok(revision)
    }

    pub(crate) fn abort(&self, txn_id: u64, write: WriteContext) {
        drop(write);
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
        debug!(target: "memstate::txn", txn_id, "Transaction aborted");
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);
        TransactionMetrics {
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("revision", &self.revision())
            .field("tables", &self.schema.tables().len())
            .finish()
    }
}

/// Watch notification for a published revision
///
/// Fires on `finish`, or on drop if a deferred callback unwinds first.
struct PendingNotify<'a> {
    watches: &'a WatchRegistry,
    revision: u64,
    touched: Option<TouchedKeys>,
}

impl PendingNotify<'_> {
    fn finish(mut self) -> usize {
        self.fire()
    }

    fn fire(&mut self) -> usize {
        match self.touched.take() {
            Some(touched) => self.watches.notify(self.revision, &touched),
            None => 0,
        }
    }
}

impl Drop for PendingNotify<'_> {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Transaction metrics
///
/// `total_started`, `total_committed` and `total_aborted` count write
/// transactions; read transactions are counted in `total_reads`.
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Read transactions started
    pub total_reads: u64,
    /// Write transactions started
    pub total_started: u64,
    /// Write transactions committed
    pub total_committed: u64,
    /// Write transactions aborted, dropped or vetoed
    pub total_aborted: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Write transactions that completed (committed + aborted)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
