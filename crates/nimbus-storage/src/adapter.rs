//! Nimbus Adapter - Storage Backend Abstraction
//!
//! Defines the pluggable storage adapter trait the document engine runs
//! against, the parameter value type that travels into SQL statements, and
//! the batch accumulator used for transactional multi-row writes.
//!
//! Key Features:
//! - Parameterized statements only; no string interpolation of values
//! - `apply_batch` commits accumulated writes atomically
//! - Object-safe, consumed behind `Arc<dyn StorageAdapter>`
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use nimbus_common::Result;
use std::collections::HashMap;

// =============================================================================
// SQL Values and Rows
// =============================================================================

/// A value bound into a SQL statement or read back from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// One result row, keyed by column name.
pub type SqlRow = HashMap<String, SqlValue>;

// =============================================================================
// Batch
// =============================================================================

/// A single accumulated write operation.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Insert {
        table: String,
        row: Vec<(String, SqlValue)>,
    },
    Update {
        table: String,
        assignments: Vec<(String, SqlValue)>,
        where_clause: String,
        params: Vec<SqlValue>,
    },
    Delete {
        table: String,
        where_clause: String,
        params: Vec<SqlValue>,
    },
}

/// Accumulates inserts, updates, and deletes for atomic commit via
/// [`StorageAdapter::apply_batch`].
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, row: Vec<(String, SqlValue)>) {
        self.ops.push(BatchOp::Insert {
            table: table.into(),
            row,
        });
    }

    pub fn update(
        &mut self,
        table: impl Into<String>,
        assignments: Vec<(String, SqlValue)>,
        where_clause: impl Into<String>,
        params: Vec<SqlValue>,
    ) {
        self.ops.push(BatchOp::Update {
            table: table.into(),
            assignments,
            where_clause: where_clause.into(),
            params,
        });
    }

    pub fn delete(
        &mut self,
        table: impl Into<String>,
        where_clause: impl Into<String>,
        params: Vec<SqlValue>,
    ) {
        self.ops.push(BatchOp::Delete {
            table: table.into(),
            where_clause: where_clause.into(),
            params,
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

// =============================================================================
// Storage Adapter Trait
// =============================================================================

/// Pluggable storage adapter interface.
///
/// Implementations own the database handle, serialize access to it, and
/// run every operation as a parameterized statement. All writes issued
/// through `apply_batch` are atomic and durable together.
pub trait StorageAdapter: Send + Sync {
    /// Execute a single DDL or DML statement; returns affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Run a parameterized read and materialize all rows.
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Insert one row into a table.
    fn insert(&self, table: &str, row: &[(String, SqlValue)]) -> Result<()>;

    /// Update rows matching the where clause; returns affected row count.
    fn update(
        &self,
        table: &str,
        assignments: &[(String, SqlValue)],
        where_clause: &str,
        params: &[SqlValue],
    ) -> Result<usize>;

    /// Delete rows matching the where clause; returns affected row count.
    fn delete(&self, table: &str, where_clause: &str, params: &[SqlValue]) -> Result<usize>;

    /// Commit every accumulated operation in one ACID transaction. Either
    /// all operations apply or none do.
    fn apply_batch(&self, batch: Batch) -> Result<()>;

    /// Raw parameterized query for aggregates (`SELECT COUNT(*) ...`).
    fn raw_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;
}

// =============================================================================
// Tests
// =============================================================================
