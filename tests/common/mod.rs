//! Common test utilities for memstate integration tests
//!
//! Provides the `nodes` / `identities` fixture schema and record builders.

#![allow(dead_code)]

use memstate::{
    CompoundStringIndex, IndexSchema, Schema, Store, StoreConfig, StringFieldIndex, TableSchema,
    UintFieldIndex, UuidFieldIndex,
};
use uuid::Uuid;

pub const NODES: &str = "nodes";
pub const IDENTITIES: &str = "identities";

/// Fields shared by every fixture record
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    pub labels: Vec<String>,
}

impl Meta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub meta: Meta,
    pub identity: u64,
    pub address: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub meta: Meta,
}

pub fn node(namespace: &str, name: &str, identity: u64) -> Node {
    Node {
        meta: Meta::new(namespace, name),
        identity,
        address: String::new(),
        status: "up".to_string(),
    }
}

pub fn identity(namespace: &str, name: &str) -> Identity {
    Identity {
        meta: Meta::new(namespace, name),
    }
}

fn node_table() -> TableSchema<Node> {
    TableSchema::new(NODES)
        .with_index(IndexSchema::new("id", UuidFieldIndex::new(|n: &Node| n.meta.id)).unique())
        .with_index(
            IndexSchema::new(
                "name",
                CompoundStringIndex::new()
                    .field(|n: &Node| n.meta.namespace.as_str())
                    .field(|n: &Node| n.meta.name.as_str()),
            )
            .unique(),
        )
        .with_index(IndexSchema::new(
            "namespace",
            StringFieldIndex::new(|n: &Node| n.meta.namespace.as_str()),
        ))
        .with_index(IndexSchema::new(
            "identity",
            UintFieldIndex::new(|n: &Node| n.identity),
        ))
        .with_index(
            IndexSchema::new(
                "address",
                StringFieldIndex::new(|n: &Node| n.address.as_str()),
            )
            .allow_missing(),
        )
}

fn identity_table() -> TableSchema<Identity> {
    TableSchema::new(IDENTITIES)
        .with_index(
            IndexSchema::new("id", UuidFieldIndex::new(|i: &Identity| i.meta.id)).unique(),
        )
        .with_index(
            IndexSchema::new(
                "name",
                CompoundStringIndex::new()
                    .field(|i: &Identity| i.meta.namespace.as_str())
                    .field(|i: &Identity| i.meta.name.as_str()),
            )
            .unique(),
        )
        .with_index(IndexSchema::new(
            "namespace",
            StringFieldIndex::new(|i: &Identity| i.meta.namespace.as_str()),
        ))
}

pub fn schema() -> Schema {
    Schema::new()
        .with_table(node_table())
        .with_table(identity_table())
}

pub fn store() -> Store {
    init_tracing();
    Store::new(schema()).unwrap()
}

pub fn store_with(config: StoreConfig) -> Store {
    init_tracing();
    Store::with_config(schema(), config).unwrap()
}

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Names of the records yielded by `iter`, in order
pub fn names<'a>(iter: impl Iterator<Item = std::sync::Arc<Node>> + 'a) -> Vec<String> {
    iter.map(|n| n.meta.name.clone()).collect()
}
