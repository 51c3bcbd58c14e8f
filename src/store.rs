//! The store handle
//!
//! A [`Store`] is cheap to clone; clones share the same tables, reflector
//! and write gate.

use crate::config::StoreConfig;
use memstate_concurrency::{
    ManagerOptions, Reflector, Transaction, TransactionManager, TransactionMetrics,
};
use memstate_core::{Query, Result, Schema};
use std::any::Any;
use std::sync::Arc;
use tracing::{info, warn};

/// Embedded multi-indexed transactional object store
///
/// # Example
///
/// ```ignore
/// let store = Store::new(schema)?;
///
/// let mut tx = store.write_tx();
/// tx.table::<Node>("nodes")?.insert(node)?;
/// tx.commit()?;
///
/// let mut tx = store.read_tx();
/// let node = tx.table::<Node>("nodes")?.first(&by_name("foo", "bar"))?;
/// ```
#[derive(Clone)]
pub struct Store {
    manager: Arc<TransactionManager>,
    config: Arc<StoreConfig>,
}

impl Store {
    /// Store with the default configuration
    ///
    /// Fails with [`memstate_core::Error::Schema`] when the schema is malformed.
    pub fn new(schema: Schema) -> Result<Self> {
        Self::with_config(schema, StoreConfig::default())
    }

    /// Store with an explicit configuration
    pub fn with_config(schema: Schema, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let schema = schema.validate().map_err(|e| {
            warn!(target: "memstate::schema", error = %e, "Rejected schema");
            e
        })?;
        info!(
            target: "memstate::schema",
            tables = schema.tables().len(),
            watch_key_limit = config.watch_key_limit,
            "Store created"
        );
        let options = ManagerOptions {
            watch_key_limit: config.watch_key_limit,
            slow_reflector: config.slow_reflector_warn(),
        };
        Ok(Self {
            manager: Arc::new(TransactionManager::new(schema, options)),
            config: Arc::new(config),
        })
    }

    /// Install the change reflector; the last assignment wins
    ///
    /// Write transactions capture the reflector when they begin.
    pub fn set_reflector(&self, reflector: impl Reflector + 'static) {
        self.manager.set_reflector(Arc::new(reflector));
    }

    /// Remove the change reflector
    pub fn clear_reflector(&self) {
        self.manager.clear_reflector();
    }

    /// Begin a write transaction, blocking while another is active
    pub fn write_tx(&self) -> Transaction {
        self.manager.begin_write()
    }

    /// Begin a read transaction on the latest committed revision
    pub fn read_tx(&self) -> Transaction {
        self.manager.begin_read()
    }

    /// Latest committed revision
    pub fn revision(&self) -> u64 {
        self.manager.revision()
    }

    /// Transaction lifecycle counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.manager.metrics()
    }

    /// The validated schema
    pub fn schema(&self) -> &Schema {
        self.manager.schema()
    }

    /// The configuration the store was built with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Every record of `table` in `index` order, from the latest revision
    pub fn scan<T: Any + Send + Sync>(&self, table: &str, index: &str) -> Result<Vec<Arc<T>>> {
        let mut tx = self.read_tx();
        let handle = tx.table::<T>(table)?;
        let records = handle.get(&Query::all(index))?.collect();
        Ok(records)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("revision", &self.revision())
            .field("config", &self.config)
            .finish()
    }
}
