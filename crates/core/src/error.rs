//! Error types for memstate
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Not-found is never an error: lookups return `Option`.

use crate::types::BoxError;
use thiserror::Error;

/// Result type alias for memstate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the store
#[derive(Debug, Error)]
pub enum Error {
    /// The schema handed to the store is malformed
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A record cannot produce a key for a required index
    ///
    /// The transaction stays usable; the failed insert had no effect.
    #[error("Indexing error on {table}.{index}: {reason}")]
    Indexing {
        /// Table the record was inserted into
        table: String,
        /// Index that could not be computed
        index: String,
        /// Why the key could not be produced
        reason: String,
    },

    /// A unique index already holds a different record under the same key
    #[error("Unique constraint violated on {table}.{index}")]
    Conflict {
        /// Table the record was inserted into
        table: String,
        /// Unique index that collided
        index: String,
    },

    /// Query arguments do not match the shape the index expects
    #[error("Invalid arguments for index {index}: {reason}")]
    Argument {
        /// Index the query targeted
        index: String,
        /// What was wrong with the arguments
        reason: String,
    },

    /// The change reflector rejected the commit
    ///
    /// Carries the reflector's own error as its source.
    #[error("Reflector rejected commit: {0}")]
    Reflector(#[source] BoxError),

    /// No table with this name is registered
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The table has no index with this name
    #[error("Index not found: {table}.{index}")]
    IndexNotFound {
        /// Table that was queried
        table: String,
        /// Missing index name
        index: String,
    },

    /// The table stores a different record type than the one requested
    #[error("Type mismatch for table {table}: stores {stored}, requested {requested}")]
    TypeMismatch {
        /// Table that was opened
        table: String,
        /// Type registered in the schema
        stored: &'static str,
        /// Type requested by the caller
        requested: &'static str,
    },

    /// Mutation attempted through a read transaction
    #[error("Transaction is read-only")]
    ReadOnly,

    /// Store configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Malformed table or index declaration, fatal at store construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Schema declares no tables at all
    #[error("schema has no tables")]
    NoTables,

    /// Table name is empty
    #[error("table name is empty")]
    EmptyTableName,

    /// Two tables share a name
    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    /// Table declares no indexes
    #[error("table {0} has no indexes")]
    NoIndexes(String),

    /// Index name is empty
    #[error("table {0} has an index with an empty name")]
    EmptyIndexName(String),

    /// Two indexes of one table share a name
    #[error("duplicate index {index} on table {table}")]
    DuplicateIndex {
        /// Table name
        table: String,
        /// Repeated index name
        index: String,
    },

    /// Table lacks the `id` primary index
    #[error("table {0} must have an \"id\" index")]
    MissingIdIndex(String),

    /// The `id` index allows missing values or is not unique
    #[error("\"id\" index on table {0} must be unique and must not allow missing values")]
    InvalidIdIndex(String),
}

/// Failure reported by an indexer while encoding a key
///
/// The caller attaches table and index names when converting this into
/// [`Error::Indexing`] or [`Error::Argument`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexerError {
    /// Wrong number of query arguments
    #[error("expected {expected} argument(s), got {got}")]
    ArgumentCount {
        /// Accepted argument count, e.g. "1" or "1..=2"
        expected: String,
        /// Provided argument count
        got: usize,
    },

    /// Argument has the wrong type
    #[error("argument {position} must be {expected}, got {got}")]
    ArgumentType {
        /// Zero-based argument position
        position: usize,
        /// Expected argument kind
        expected: &'static str,
        /// Provided argument kind
        got: &'static str,
    },

    /// Value cannot be encoded as a key
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Record handed to the indexer is not the table's type
    #[error("record is not a {0}")]
    WrongRecordType(&'static str),
}

impl IndexerError {
    /// Attach table/index context to an error raised while indexing a record
    pub fn into_indexing(self, table: &str, index: &str) -> Error {
        Error::Indexing {
            table: table.to_string(),
            index: index.to_string(),
            reason: self.to_string(),
        }
    }

    /// Attach index context to an error raised while encoding query arguments
    pub fn into_argument(self, index: &str) -> Error {
        Error::Argument {
            index: index.to_string(),
            reason: self.to_string(),
        }
    }
}
