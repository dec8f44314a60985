//! Nimbus Schema - Persistent Relational Schema
//!
//! The relational layout documents are mapped onto. Collections are rows
//! in `collections`; every document is one row in `documents` carrying its
//! JSON payload, with a foreign key that cascades collection drops.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

/// Table holding one row per collection.
pub const TABLE_COLLECTIONS: &str = "collections";

/// Table holding one row per document.
pub const TABLE_DOCUMENTS: &str = "documents";

/// Schema version recorded via `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// DDL executed on every open. Idempotent.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection_name TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_collection_name
    ON documents(collection_name);
"#;
