use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::SecondsFormat;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use super::engine::{Dialect, SqlEngine, SqlRow, SqlType, SqlValue};
use crate::errors::{Result, StorageError};

/// SQLite engine.
///
/// Wraps the connection behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct SqliteEngine {
    conn: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteEngine {
    /// Open (or create) a database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Connection(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::configure(conn)
    }

    /// In-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "SQLite connection opened");
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Run a closure with the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::Connection(format!("SQLite lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .context("SQLite task panicked")?
    }
}

fn to_sqlite(value: SqlValue) -> Value {
    match value {
        SqlValue::Null(_) => Value::Null,
        SqlValue::Int(v) => Value::Integer(v),
        SqlValue::Real(v) => Value::Real(v),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Bool(v) => Value::Integer(i64::from(v)),
        SqlValue::Json(v) => Value::Text(v.to_string()),
        SqlValue::Timestamp(ts) => Value::Text(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null(SqlType::Text),
        ValueRef::Integer(v) => SqlValue::Int(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn bind(params: Vec<SqlValue>) -> Vec<Value> {
    params.into_iter().map(to_sqlite).collect()
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let sql = sql.to_string();
        let values = bind(params);
        self.call(move |conn| {
            let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(changed as u64)
        })
        .await
    }

    async fn insert(&self, sql: &str, params: Vec<SqlValue>) -> Result<i64> {
        let sql = sql.to_string();
        let values = bind(params);
        self.call(move |conn| {
            conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>> {
        let sql = sql.to_string();
        let values = bind(params);
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut columns = HashMap::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    columns.insert(name.clone(), from_sqlite(row.get_ref(idx)?));
                }
                out.push(SqlRow::new(columns));
            }
            Ok(out)
        })
        .await
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        let statements = statements.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for statement in &statements {
                tx.execute_batch(statement)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        let result = self
            .call(|conn| {
                conn.execute_batch("PRAGMA optimize;")?;
                Ok(())
            })
            .await;
        if let Err(err) = result {
            debug!(error = %err, "SQLite optimize on close failed");
        }
    }
}
