//! Nimbus Config - Store Configuration
//!
//! Configuration consumed when a store is opened. Defaults are suitable
//! for embedding in a desktop or server process.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for opening a document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Location of the database file on disk.
    pub path: PathBuf,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Write-ahead journaling. On by default; crash recovery depends on it.
    pub enable_wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./nimbus.db"),
            busy_timeout: Duration::from_secs(5),
            enable_wal: true,
        }
    }
}

impl StoreConfig {
    /// Configuration pointing at the given database file.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}
