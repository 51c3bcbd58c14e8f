//! memstate - Embedded in-memory multi-indexed transactional object store
//!
//! Typed tables with secondary indexes, snapshot-isolated transactions over
//! persistent copy-on-write trees, live-query invalidation, and a
//! commit-time change hook that can veto a commit.
//!
//! # Quick Start
//!
//! ```ignore
//! use memstate::{by_namespace, IndexSchema, Schema, Store, StringFieldIndex, TableSchema};
//!
//! let schema = Schema::new().with_table(
//!     TableSchema::<Node>::new("nodes")
//!         .with_index(IndexSchema::new("id", StringFieldIndex::new(|n: &Node| n.id.as_str())).unique())
//!         .with_index(IndexSchema::new("namespace", StringFieldIndex::new(|n: &Node| n.namespace.as_str()))),
//! );
//! let store = Store::new(schema)?;
//!
//! let mut tx = store.write_tx();
//! tx.table::<Node>("nodes")?.insert(node)?;
//! tx.commit()?;
//!
//! let mut tx = store.read_tx();
//! let mut iter = tx.table::<Node>("nodes")?.get(&by_namespace("baz"))?;
//! let changed = iter.invalidated();
//! ```
//!
//! # Architecture
//!
//! - `memstate-core`: schema, indexers, queries, errors
//! - `memstate-storage`: persistent trees and published roots
//! - `memstate-concurrency`: transactions, watches, reflector

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use store::Store;

pub use memstate_concurrency::{
    Change, ChangeKind, Changes, Iter, Reflector, ResultIter, Table, Transaction,
    TransactionMetrics, WatchHandle,
};
pub use memstate_core::*;
