//! Nimbus Storage - Relational Substrate Adapter
//!
//! Thin abstraction over the embedded SQL engine that persists documents.
//! The document engine never speaks SQL dialects directly; it goes through
//! the [`StorageAdapter`] trait, which keeps the substrate swappable and
//! the engine testable against any conforming backend.
//!
//! Key Features:
//! - Object-safe adapter trait (execute, query, insert, update, delete)
//! - Batch primitive committing accumulated writes in one transaction
//! - SQLite implementation with WAL journaling and enforced schema
//!
//! @version 0.1.0
//! @author Nimbus Development Team

pub mod adapter;
pub mod schema;
pub mod sqlite;

pub use adapter::{Batch, BatchOp, SqlRow, SqlValue, StorageAdapter};
pub use schema::{TABLE_COLLECTIONS, TABLE_DOCUMENTS};
pub use sqlite::SqliteAdapter;
