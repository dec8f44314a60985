//! Nimbus Store - Database Lifecycle
//!
//! Opens or creates the backing database, hands out collection handles,
//! and manages the collection catalog. Collections are auto-created on
//! first use; dropping one cascades to its documents.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use crate::collection::Collection;
use nimbus_common::{Result, StoreConfig};
use nimbus_storage::{SqlValue, SqliteAdapter, StorageAdapter, TABLE_COLLECTIONS};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// Store
// =============================================================================

/// A handle to one document database.
pub struct Store {
    storage: Arc<dyn StorageAdapter>,
}

impl Store {
    /// Open (or create) the database file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(&StoreConfig::at_path(path.as_ref()))
    }

    /// Open with explicit configuration.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        Ok(Self::with_adapter(Arc::new(SqliteAdapter::open(config)?)))
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_adapter(Arc::new(SqliteAdapter::in_memory()?)))
    }

    /// Build a store over an already-open storage adapter.
    pub fn with_adapter(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { storage: adapter }
    }

    /// Get a collection handle, creating the collection if absent.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.storage.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?)",
            &[SqlValue::from(name)],
        )?;
        Ok(Collection::new(name, Arc::clone(&self.storage)))
    }

    /// Drop a collection and, via cascade, every document in it. Returns
    /// whether the collection existed; storage failures are swallowed to
    /// `false`.
    pub fn drop_collection(&self, name: &str) -> bool {
        match self
            .storage
            .delete(TABLE_COLLECTIONS, "name = ?", &[SqlValue::from(name)])
        {
            Ok(removed) => removed > 0,
            Err(e) => {
                warn!(collection = name, error = %e, "drop_collection failed");
                false
            }
        }
    }

    /// Names of every collection, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let rows = self
            .storage
            .query("SELECT name FROM collections ORDER BY name", &[])?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(SqlValue::as_str))
            .map(str::to_string)
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
