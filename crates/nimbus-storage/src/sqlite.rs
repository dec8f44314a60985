//! Nimbus SQLite - Embedded SQL Engine Adapter
//!
//! [`StorageAdapter`] implementation over an embedded SQLite database.
//! Owns the process-wide connection behind a mutex, enables WAL
//! journaling and foreign-key enforcement at open, and enforces the
//! document schema before handing the connection to the engine.
//!
//! Key Features:
//! - Single shared connection, statements serialized internally
//! - WAL journaling and busy-timeout configured at open
//! - Batches commit inside one transaction
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use crate::adapter::{Batch, BatchOp, SqlRow, SqlValue, StorageAdapter};
use crate::schema::{SCHEMA_SQL, SCHEMA_VERSION};
use nimbus_common::{NimbusError, Result, StoreConfig};
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use tracing::{debug, info};

// =============================================================================
// Parameter Binding
// =============================================================================

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn map_err(err: rusqlite::Error) -> NimbusError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            NimbusError::ConstraintViolation(err.to_string())
        }
        _ => NimbusError::Storage(err.to_string()),
    }
}

fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        // The schema has no blob columns.
        ValueRef::Blob(_) => SqlValue::Null,
    }
}

// =============================================================================
// SQLite Adapter
// =============================================================================

/// Storage adapter backed by an embedded SQLite database.
pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    /// Open (or create) the database at the configured path.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.path).map_err(map_err)?;
        conn.busy_timeout(config.busy_timeout).map_err(map_err)?;

        if config.enable_wal {
            let mode: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .map_err(map_err)?;
            debug!(mode = %mode, "journal mode configured");
        }

        Self::initialize(&conn)?;
        info!(path = %config.path.display(), "opened document database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database. Used by tests and callers that
    /// want the engine without a file on disk.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_err)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(map_err)?;
        Ok(())
    }

    fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(map_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut record = SqlRow::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(map_err)?;
                record.insert(name.clone(), value_from_ref(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn apply_op(conn: &Connection, op: &BatchOp) -> Result<usize> {
        match op {
            BatchOp::Insert { table, row } => {
                let columns: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
                let placeholders = vec!["?"; row.len()].join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    placeholders
                );
                conn.execute(&sql, params_from_iter(row.iter().map(|(_, v)| v)))
                    .map_err(map_err)
            }
            BatchOp::Update {
                table,
                assignments,
                where_clause,
                params,
            } => {
                let set: Vec<String> = assignments
                    .iter()
                    .map(|(c, _)| format!("{} = ?", c))
                    .collect();
                let sql = format!(
                    "UPDATE {} SET {} WHERE {}",
                    table,
                    set.join(", "),
                    where_clause
                );
                let bound: Vec<&SqlValue> = assignments
                    .iter()
                    .map(|(_, v)| v)
                    .chain(params.iter())
                    .collect();
                conn.execute(&sql, params_from_iter(bound)).map_err(map_err)
            }
            BatchOp::Delete {
                table,
                where_clause,
                params,
            } => {
                let sql = format!("DELETE FROM {} WHERE {}", table, where_clause);
                conn.execute(&sql, params_from_iter(params.iter()))
                    .map_err(map_err)
            }
        }
    }
}

impl StorageAdapter for SqliteAdapter {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(sql, params_from_iter(params.iter()))
            .map_err(map_err)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let conn = self.conn.lock();
        Self::run_query(&conn, sql, params)
    }

    fn insert(&self, table: &str, row: &[(String, SqlValue)]) -> Result<()> {
        let conn = self.conn.lock();
        Self::apply_op(
            &conn,
            &BatchOp::Insert {
                table: table.to_string(),
                row: row.to_vec(),
            },
        )?;
        Ok(())
    }

    fn update(
        &self,
        table: &str,
        assignments: &[(String, SqlValue)],
        where_clause: &str,
        params: &[SqlValue],
    ) -> Result<usize> {
        let conn = self.conn.lock();
        Self::apply_op(
            &conn,
            &BatchOp::Update {
                table: table.to_string(),
                assignments: assignments.to_vec(),
                where_clause: where_clause.to_string(),
                params: params.to_vec(),
            },
        )
    }

    fn delete(&self, table: &str, where_clause: &str, params: &[SqlValue]) -> Result<usize> {
        let conn = self.conn.lock();
        Self::apply_op(
            &conn,
            &BatchOp::Delete {
                table: table.to_string(),
                where_clause: where_clause.to_string(),
                params: params.to_vec(),
            },
        )
    }

    fn apply_batch(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_err)?;
        for op in batch.into_ops() {
            Self::apply_op(&tx, &op)?;
        }
        tx.commit().map_err(map_err)?;
        debug!(ops = count, "batch committed");
        Ok(())
    }

    fn raw_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let conn = self.conn.lock();
        Self::run_query(&conn, sql, params)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TABLE_COLLECTIONS, TABLE_DOCUMENTS};

    fn seed_collection(adapter: &SqliteAdapter, name: &str) {
        adapter
            .insert(
                TABLE_COLLECTIONS,
                &[("name".to_string(), SqlValue::from(name))],
            )
            .unwrap();
    }

    fn doc_row(id: &str, collection: &str) -> Vec<(String, SqlValue)> {
        vec![
            ("id".to_string(), SqlValue::from(id)),
            ("collection_name".to_string(), SqlValue::from(collection)),
            ("data".to_string(), SqlValue::from("{}")),
            ("created_at".to_string(), SqlValue::Integer(1)),
            ("updated_at".to_string(), SqlValue::Integer(1)),
        ]
    }

    #[test]
    fn test_schema_round_trip() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        seed_collection(&adapter, "users");
        adapter.insert(TABLE_DOCUMENTS, &doc_row("d1", "users")).unwrap();

        let rows = adapter
            .query(
                "SELECT id, data FROM documents WHERE collection_name = ?",
                &[SqlValue::from("users")],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"].as_str(), Some("d1"));
        assert_eq!(rows[0]["data"].as_str(), Some("{}"));
    }

    #[test]
    fn test_foreign_key_enforced() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        let err = adapter
            .insert(TABLE_DOCUMENTS, &doc_row("orphan", "missing"))
            .unwrap_err();
        assert!(err.is_constraint_error());
    }

    #[test]
    fn test_cascade_delete() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        seed_collection(&adapter, "users");
        adapter.insert(TABLE_DOCUMENTS, &doc_row("d1", "users")).unwrap();

        let removed = adapter
            .delete(TABLE_COLLECTIONS, "name = ?", &[SqlValue::from("users")])
            .unwrap();
        assert_eq!(removed, 1);

        let rows = adapter
            .query("SELECT id FROM documents", &[])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_batch_is_atomic() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        seed_collection(&adapter, "users");

        let mut batch = Batch::new();
        batch.insert(TABLE_DOCUMENTS, doc_row("good", "users"));
        // Violates the foreign key; the whole batch must roll back.
        batch.insert(TABLE_DOCUMENTS, doc_row("bad", "missing"));

        assert!(adapter.apply_batch(batch).is_err());
        let rows = adapter.query("SELECT id FROM documents", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_update_and_count() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        seed_collection(&adapter, "users");
        adapter.insert(TABLE_DOCUMENTS, &doc_row("d1", "users")).unwrap();

        let changed = adapter
            .update(
                TABLE_DOCUMENTS,
                &[("data".to_string(), SqlValue::from("{\"a\":1}"))],
                "id = ?",
                &[SqlValue::from("d1")],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let rows = adapter
            .raw_query(
                "SELECT COUNT(*) AS count FROM documents WHERE collection_name = ?",
                &[SqlValue::from("users")],
            )
            .unwrap();
        assert_eq!(rows[0]["count"].as_i64(), Some(1));
    }

    #[test]
    fn test_on_disk_open_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::at_path(dir.path().join("nimbus.db"));

        {
            let adapter = SqliteAdapter::open(&config).unwrap();
            seed_collection(&adapter, "users");
            adapter.insert(TABLE_DOCUMENTS, &doc_row("d1", "users")).unwrap();
        }

        let adapter = SqliteAdapter::open(&config).unwrap();
        let rows = adapter.query("SELECT id FROM documents", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
