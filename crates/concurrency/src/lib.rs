//! Concurrency layer for memstate
//!
//! This crate implements snapshot-isolated transactions with:
//! - TransactionManager: single write gate, atomic root publication, metrics
//! - Transaction: erased and typed (`Table<T>`) reads and writes
//! - ResultIter / Iter: owned cursors over a transaction's view of an index
//! - WatchRegistry: per-query invalidation handles fired by later commits
//! - Reflector: commit-time hook that can veto a commit
//! - Deferred callbacks, run after publication

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod iter;
pub mod manager;
pub mod reflector;
pub mod transaction;
pub mod watch;

pub use iter::{Iter, ResultIter};
pub use manager::{ManagerOptions, TransactionManager, TransactionMetrics};
pub use reflector::{Change, ChangeKind, Changes, Reflector};
pub use transaction::{Table, Transaction};
pub use watch::{TouchedKeys, WatchHandle, WatchRegistry};
