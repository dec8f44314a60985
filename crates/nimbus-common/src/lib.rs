//! Nimbus Common - Shared Types and Utilities
//!
//! Foundational error handling and configuration used across the Nimbus
//! document database crates. Provides the unified error type surfaced by
//! every storage and engine operation, and the configuration structure
//! consumed when a store is opened.
//!
//! Key Features:
//! - Unified error type with user/storage error classification
//! - Shared `Result` alias
//! - Store configuration with sensible defaults
//!
//! @version 0.1.0
//! @author Nimbus Development Team

pub mod config;
pub mod error;

pub use config::StoreConfig;
pub use error::{NimbusError, Result};
