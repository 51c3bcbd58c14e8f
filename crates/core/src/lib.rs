//! Core types and traits for memstate
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy (`Error`, `SchemaError`, `IndexerError`)
//! - Schema: Table and index declarations, validated once at store construction
//! - Indexer: Byte-comparable key encoders for record fields and query arguments
//! - Query: Index name + argument list, with the stock query constructors
//! - Types: Type-erased record handle and record type identity

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod indexer;
pub mod query;
pub mod schema;
pub mod types;

pub use error::{Error, IndexerError, Result, SchemaError};
pub use indexer::{
    BoolFieldIndex, CompoundStringIndex, ErasedIndexer, FnIndex, Indexer, IntFieldIndex,
    KeyResult, StringFieldIndex, UintFieldIndex, UuidFieldIndex,
};
pub use query::{
    by_id, by_identity, by_name, by_namespace, Arg, Query, IDENTITY_INDEX, ID_INDEX, NAMESPACE_INDEX,
    NAME_INDEX,
};
pub use schema::{IndexDef, IndexSchema, Schema, TableDef, TableSchema};
pub use types::{downcast, BoxError, Object, RecordType};
pub use uuid::Uuid;
