//! Schema registry: tables and their indexes, fixed at store construction
//!
//! Tables are declared with typed builders ([`TableSchema<T>`],
//! [`IndexSchema<T>`]) and erased into a [`Schema`] that the store validates
//! once. After construction the shape never changes; data validity (required
//! index values, uniqueness) is checked at insert time.

use crate::error::SchemaError;
use crate::indexer::{Erased, ErasedIndexer, Indexer};
use crate::query::ID_INDEX;
use crate::types::RecordType;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Typed declaration of one index
pub struct IndexSchema<T> {
    name: String,
    unique: bool,
    allow_missing: bool,
    indexer: Arc<dyn ErasedIndexer>,
    _record: std::marker::PhantomData<fn(&T)>,
}

impl<T: Any + Send + Sync> IndexSchema<T> {
    /// Non-unique, required index named `name`
    pub fn new<I: Indexer<T>>(name: impl Into<String>, indexer: I) -> Self {
        Self {
            name: name.into(),
            unique: false,
            allow_missing: false,
            indexer: Arc::new(Erased::<T, I>::new(indexer)),
            _record: std::marker::PhantomData,
        }
    }

    /// No two records may share a key
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Records without a value are left out of the index instead of rejected
    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }
}

/// Typed declaration of one table
pub struct TableSchema<T> {
    name: String,
    indexes: Vec<IndexSchema<T>>,
}

impl<T: Any + Send + Sync> TableSchema<T> {
    /// Table named `name` holding records of type `T`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// Add an index
    pub fn with_index(mut self, index: IndexSchema<T>) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Erased index definition, as used by the storage layer
#[derive(Clone)]
pub struct IndexDef {
    name: String,
    unique: bool,
    allow_missing: bool,
    indexer: Arc<dyn ErasedIndexer>,
}

impl IndexDef {
    /// Index name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether keys must be unique
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether records may lack a value for this index
    pub fn allows_missing(&self) -> bool {
        self.allow_missing
    }

    /// Key encoders
    pub fn indexer(&self) -> &dyn ErasedIndexer {
        self.indexer.as_ref()
    }
}

impl fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .field("allow_missing", &self.allow_missing)
            .finish()
    }
}

/// Erased table definition
///
/// Indexes are kept in declaration order except that the `id` index is
/// always at position [`TableDef::ID_POSITION`].
#[derive(Debug, Clone)]
pub struct TableDef {
    name: String,
    record_type: RecordType,
    indexes: Vec<IndexDef>,
}

impl TableDef {
    /// Position of the primary `id` index
    pub const ID_POSITION: usize = 0;

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the records stored in this table
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// All indexes, `id` first
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Position and definition of the index named `name`
    pub fn index(&self, name: &str) -> Option<(usize, &IndexDef)> {
        self.indexes
            .iter()
            .enumerate()
            .find(|(_, idx)| idx.name == name)
    }

    /// The primary `id` index
    pub fn id_index(&self) -> &IndexDef {
        &self.indexes[Self::ID_POSITION]
    }

    fn validate(&mut self) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyTableName);
        }
        if self.indexes.is_empty() {
            return Err(SchemaError::NoIndexes(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for idx in &self.indexes {
            if idx.name.is_empty() {
                return Err(SchemaError::EmptyIndexName(self.name.clone()));
            }
            if !seen.insert(idx.name.as_str()) {
                return Err(SchemaError::DuplicateIndex {
                    table: self.name.clone(),
                    index: idx.name.clone(),
                });
            }
        }
        let (pos, id) = self
            .index(ID_INDEX)
            .ok_or_else(|| SchemaError::MissingIdIndex(self.name.clone()))?;
        if !id.unique || id.allow_missing {
            return Err(SchemaError::InvalidIdIndex(self.name.clone()));
        }
        let id = self.indexes.remove(pos);
        self.indexes.insert(Self::ID_POSITION, id);
        Ok(())
    }
}

/// The full set of tables a store is built from
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    /// Empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table
    pub fn with_table<T: Any + Send + Sync>(mut self, table: TableSchema<T>) -> Self {
        self.tables.push(TableDef {
            name: table.name,
            record_type: RecordType::of::<T>(),
            indexes: table
                .indexes
                .into_iter()
                .map(|idx| IndexDef {
                    name: idx.name,
                    unique: idx.unique,
                    allow_missing: idx.allow_missing,
                    indexer: idx.indexer,
                })
                .collect(),
        });
        self
    }

    /// Check names and the primary index of every table
    ///
    /// Consumes the builder and returns the frozen schema.
    pub fn validate(mut self) -> Result<Schema, SchemaError> {
        if self.tables.is_empty() {
            return Err(SchemaError::NoTables);
        }
        let mut seen = HashSet::new();
        for table in &mut self.tables {
            table.validate()?;
            if !seen.insert(table.name.clone()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }
        Ok(self)
    }

    /// All tables, in registration order
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Position and definition of the table named `name`
    pub fn table(&self, name: &str) -> Option<(usize, &TableDef)> {
        self.tables
            .iter()
            .enumerate()
            .find(|(_, t)| t.name == name)
    }
}
