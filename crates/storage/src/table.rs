//! Per-table index maintenance
//!
//! A [`TableIndexes`] holds one persistent tree per index of a table, in the
//! order of [`TableDef::indexes`]. Every tree entry points at the same shared
//! record, so a record's identity across indexes is pointer identity.
//!
//! Tree key layout:
//! - `id` and other unique indexes: the index key itself
//! - non-unique indexes: the index key followed by the record's `id` key, so
//!   several records may share an index key and an exact lookup becomes a
//!   prefix scan

use crate::tree::Tree;
use memstate_core::{Error, IndexDef, Object, Result, TableDef};
use smallvec::SmallVec;
use std::any::Any;
use std::sync::Arc;

const ID: usize = TableDef::ID_POSITION;

type Keys = SmallVec<[Option<Vec<u8>>; 4]>;

/// One tree per index of a table
#[derive(Clone, Debug)]
pub struct TableIndexes {
    trees: Vec<Tree<Object>>,
}

impl TableIndexes {
    /// Empty trees for every index of `def`
    pub fn new(def: &TableDef) -> Self {
        Self {
            trees: vec![Tree::new(); def.indexes().len()],
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.trees[ID].len()
    }

    /// Whether the table holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tree of the index at `position`
    pub fn tree(&self, position: usize) -> &Tree<Object> {
        &self.trees[position]
    }

    /// Stored record with the given `id` key
    pub fn get_by_id(&self, id_key: &[u8]) -> Option<&Object> {
        self.trees[ID].get(id_key)
    }

    /// Insert or replace a record
    ///
    /// A stored record with the same `id` key is replaced and returned. Every
    /// fallible step (key encoding, uniqueness) runs before the trees are
    /// touched, so on error the table is unchanged. `touched` receives the
    /// `(index position, tree key)` of every entry removed or added.
    pub fn insert(
        &mut self,
        def: &TableDef,
        object: Object,
        mut touched: impl FnMut(usize, &[u8]),
    ) -> Result<Option<Object>> {
        let keys = index_keys(def, &object)?;
        let id_key = required_id(def, &keys)?.to_vec();

        let previous = self.trees[ID].get(&id_key).cloned();
        let previous_keys = match &previous {
            Some(prev) => Some(index_keys(def, prev)?),
            None => None,
        };

        for (pos, idx) in def.indexes().iter().enumerate().skip(ID + 1) {
            if !idx.is_unique() {
                continue;
            }
            let Some(key) = &keys[pos] else { continue };
            if let Some(existing) = self.trees[pos].get(key) {
                let same_record = previous
                    .as_ref()
                    .map_or(false, |prev| Arc::ptr_eq(prev, existing));
                if !same_record {
                    return Err(Error::Conflict {
                        table: def.name().to_string(),
                        index: idx.name().to_string(),
                    });
                }
            }
        }

        if let Some(previous_keys) = previous_keys {
            self.remove_entries(def, &previous_keys, &id_key, &mut touched);
        }
        for (pos, idx) in def.indexes().iter().enumerate() {
            if let Some(key) = &keys[pos] {
                let tree_key = tree_key(idx, key, &id_key);
                touched(pos, &tree_key);
                self.trees[pos].insert(tree_key, object.clone());
            }
        }
        Ok(previous)
    }

    /// Remove the stored record with the given `id` key
    ///
    /// Entries are located from the *stored* record's keys, so deleting
    /// through a stale copy of a record still removes the live one. Returns
    /// `None` when no such record exists; the table is then unchanged.
    pub fn delete(
        &mut self,
        def: &TableDef,
        id_key: &[u8],
        mut touched: impl FnMut(usize, &[u8]),
    ) -> Result<Option<Object>> {
        let Some(stored) = self.trees[ID].get(id_key).cloned() else {
            return Ok(None);
        };
        let keys = index_keys(def, &stored)?;
        self.remove_entries(def, &keys, id_key, &mut touched);
        Ok(Some(stored))
    }

    fn remove_entries(
        &mut self,
        def: &TableDef,
        keys: &Keys,
        id_key: &[u8],
        touched: &mut impl FnMut(usize, &[u8]),
    ) {
        for (pos, idx) in def.indexes().iter().enumerate() {
            if let Some(key) = &keys[pos] {
                let tree_key = tree_key(idx, key, id_key);
                touched(pos, &tree_key);
                self.trees[pos].remove(&tree_key);
            }
        }
    }
}

/// Encode the `id` key of a record
pub fn id_key(def: &TableDef, record: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
    let idx = def.id_index();
    match idx.indexer().from_object(record) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(missing(def, idx)),
        Err(e) => Err(e.into_indexing(def.name(), idx.name())),
    }
}

fn index_keys(def: &TableDef, object: &Object) -> Result<Keys> {
    def.indexes()
        .iter()
        .map(|idx| match idx.indexer().from_object(&**object) {
            Ok(Some(key)) => Ok(Some(key)),
            Ok(None) if idx.allows_missing() => Ok(None),
            Ok(None) => Err(missing(def, idx)),
            Err(e) => Err(e.into_indexing(def.name(), idx.name())),
        })
        .collect()
}

fn required_id<'a>(def: &TableDef, keys: &'a Keys) -> Result<&'a [u8]> {
    keys[ID]
        .as_deref()
        .ok_or_else(|| missing(def, def.id_index()))
}

fn missing(def: &TableDef, idx: &IndexDef) -> Error {
    Error::Indexing {
        table: def.name().to_string(),
        index: idx.name().to_string(),
        reason: "missing value for required index".to_string(),
    }
}

fn tree_key(idx: &IndexDef, key: &[u8], id_key: &[u8]) -> Vec<u8> {
    if idx.is_unique() {
        key.to_vec()
    } else {
        let mut out = Vec::with_capacity(key.len() + id_key.len());
        out.extend_from_slice(key);
        out.extend_from_slice(id_key);
        out
    }
}
