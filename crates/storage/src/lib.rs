//! Storage layer for memstate
//!
//! This crate implements the versioned in-memory backend:
//! - Tree: persistent AVL tree with path copying and O(1) clone
//! - TableIndexes: one tree per index, maintained together on insert/delete
//! - Root: an immutable committed version of every table
//! - SnapshotStore: ArcSwap-published latest root, lock-free snapshot capture

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod snapshot;
pub mod table;
pub mod tree;

pub use snapshot::{Root, SnapshotStore};
pub use table::{id_key, TableIndexes};
pub use tree::{Entry, Iter, RevIter, Tree};
