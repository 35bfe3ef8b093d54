//! PostgreSQL and MySQL engines over sqlx pools.
//!
//! Pools are created lazily so constructing a provider never touches the
//! network; the first query (normally schema creation in `initialize`)
//! opens connections.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Column, Row, TypeInfo};

use super::engine::{Dialect, SqlEngine, SqlRow, SqlType, SqlValue};
use crate::config::StorageOptions;
use crate::errors::{Result, StorageError};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;

macro_rules! bind_values {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                SqlValue::Null(SqlType::Int) => query.bind(None::<i64>),
                SqlValue::Null(SqlType::Real) => query.bind(None::<f64>),
                SqlValue::Null(SqlType::Text) => query.bind(None::<String>),
                SqlValue::Null(SqlType::Bool) => query.bind(None::<bool>),
                SqlValue::Null(SqlType::Json) => query.bind(None::<Json<serde_json::Value>>),
                SqlValue::Null(SqlType::Timestamp) => query.bind(None::<DateTime<Utc>>),
                SqlValue::Int(v) => query.bind(v),
                SqlValue::Real(v) => query.bind(v),
                SqlValue::Text(v) => query.bind(v),
                SqlValue::Bool(v) => query.bind(v),
                SqlValue::Json(v) => query.bind(Json(v)),
                SqlValue::Timestamp(v) => query.bind(v),
            };
        }
        query
    }};
}

fn nullable<T>(value: Option<T>, ty: SqlType, wrap: impl FnOnce(T) -> SqlValue) -> SqlValue {
    value.map(wrap).unwrap_or(SqlValue::Null(ty))
}

fn connection_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Configuration(_) | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StorageError::Connection(err.to_string())
        }
        other => other.into(),
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────────

pub struct PostgresEngine {
    pool: PgPool,
}

impl PostgresEngine {
    pub fn connect_lazy(url: &str, options: &StorageOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .acquire_timeout(Duration::from_millis(
                options.connect_timeout_ms.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS),
            ))
            .connect_lazy(url)
            .map_err(|e| StorageError::Config(format!("invalid PostgreSQL URL: {}", e)))?;
        Ok(Self { pool })
    }
}

fn decode_pg_row(row: &PgRow) -> Result<SqlRow> {
    let mut columns = HashMap::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT8" => nullable(row.try_get::<Option<i64>, _>(idx)?, SqlType::Int, SqlValue::Int),
            "INT4" => nullable(row.try_get::<Option<i32>, _>(idx)?, SqlType::Int, |v| {
                SqlValue::Int(i64::from(v))
            }),
            "INT2" => nullable(row.try_get::<Option<i16>, _>(idx)?, SqlType::Int, |v| {
                SqlValue::Int(i64::from(v))
            }),
            "FLOAT8" => nullable(row.try_get::<Option<f64>, _>(idx)?, SqlType::Real, SqlValue::Real),
            "FLOAT4" => nullable(row.try_get::<Option<f32>, _>(idx)?, SqlType::Real, |v| {
                SqlValue::Real(f64::from(v))
            }),
            "BOOL" => nullable(row.try_get::<Option<bool>, _>(idx)?, SqlType::Bool, SqlValue::Bool),
            "JSON" | "JSONB" => nullable(
                row.try_get::<Option<Json<serde_json::Value>>, _>(idx)?,
                SqlType::Json,
                |v| SqlValue::Json(v.0),
            ),
            "TIMESTAMPTZ" => nullable(
                row.try_get::<Option<DateTime<Utc>>, _>(idx)?,
                SqlType::Timestamp,
                SqlValue::Timestamp,
            ),
            "TIMESTAMP" => nullable(
                row.try_get::<Option<NaiveDateTime>, _>(idx)?,
                SqlType::Timestamp,
                |v| SqlValue::Timestamp(v.and_utc()),
            ),
            "DATE" => nullable(row.try_get::<Option<NaiveDate>, _>(idx)?, SqlType::Text, |v| {
                SqlValue::Text(v.to_string())
            }),
            _ => nullable(row.try_get::<Option<String>, _>(idx)?, SqlType::Text, SqlValue::Text),
        };
        columns.insert(column.name().to_string(), value);
    }
    Ok(SqlRow::new(columns))
}

#[async_trait]
impl SqlEngine for PostgresEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let result = bind_values!(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(connection_error)?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, sql: &str, params: Vec<SqlValue>) -> Result<i64> {
        let row = bind_values!(sqlx::query(sql), params)
            .fetch_one(&self.pool)
            .await
            .map_err(connection_error)?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>> {
        let rows = bind_values!(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(connection_error)?;
        rows.iter().map(decode_pg_row).collect()
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(connection_error)?;
        for statement in statements {
            let conn: &mut sqlx::PgConnection = &mut tx;
            sqlx::Executor::execute(conn, sqlx::raw_sql(statement)).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ── MySQL ───────────────────────────────────────────────────────────

pub struct MysqlEngine {
    pool: MySqlPool,
}

impl MysqlEngine {
    pub fn connect_lazy(url: &str, options: &StorageOptions) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .acquire_timeout(Duration::from_millis(
                options.connect_timeout_ms.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS),
            ))
            .connect_lazy(url)
            .map_err(|e| StorageError::Config(format!("invalid MySQL URL: {}", e)))?;
        Ok(Self { pool })
    }
}

fn decode_mysql_text(row: &MySqlRow, idx: usize) -> Result<SqlValue> {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(v) => Ok(nullable(v, SqlType::Text, SqlValue::Text)),
        Err(_) => {
            let bytes = row.try_get::<Option<Vec<u8>>, _>(idx)?;
            Ok(nullable(bytes, SqlType::Text, |b| {
                SqlValue::Text(String::from_utf8_lossy(&b).into_owned())
            }))
        }
    }
}

fn decode_mysql_row(row: &MySqlRow) -> Result<SqlRow> {
    let mut columns = HashMap::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BIGINT" => nullable(row.try_get::<Option<i64>, _>(idx)?, SqlType::Int, SqlValue::Int),
            "BIGINT UNSIGNED" => nullable(row.try_get::<Option<u64>, _>(idx)?, SqlType::Int, |v| {
                SqlValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
            }),
            "INT" | "MEDIUMINT" => nullable(row.try_get::<Option<i32>, _>(idx)?, SqlType::Int, |v| {
                SqlValue::Int(i64::from(v))
            }),
            "SMALLINT" => nullable(row.try_get::<Option<i16>, _>(idx)?, SqlType::Int, |v| {
                SqlValue::Int(i64::from(v))
            }),
            "TINYINT" => nullable(row.try_get::<Option<i8>, _>(idx)?, SqlType::Int, |v| {
                SqlValue::Int(i64::from(v))
            }),
            "BOOLEAN" => nullable(row.try_get::<Option<bool>, _>(idx)?, SqlType::Bool, SqlValue::Bool),
            "DOUBLE" => nullable(row.try_get::<Option<f64>, _>(idx)?, SqlType::Real, SqlValue::Real),
            "FLOAT" => nullable(row.try_get::<Option<f32>, _>(idx)?, SqlType::Real, |v| {
                SqlValue::Real(f64::from(v))
            }),
            "JSON" => match row.try_get::<Option<Json<serde_json::Value>>, _>(idx) {
                Ok(v) => nullable(v, SqlType::Json, |v| SqlValue::Json(v.0)),
                Err(_) => decode_mysql_text(row, idx)?,
            },
            "DATETIME" | "TIMESTAMP" => nullable(
                row.try_get::<Option<NaiveDateTime>, _>(idx)?,
                SqlType::Timestamp,
                |v| SqlValue::Timestamp(v.and_utc()),
            ),
            "DATE" => nullable(row.try_get::<Option<NaiveDate>, _>(idx)?, SqlType::Text, |v| {
                SqlValue::Text(v.to_string())
            }),
            _ => decode_mysql_text(row, idx)?,
        };
        columns.insert(column.name().to_string(), value);
    }
    Ok(SqlRow::new(columns))
}

#[async_trait]
impl SqlEngine for MysqlEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let result = bind_values!(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(connection_error)?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, sql: &str, params: Vec<SqlValue>) -> Result<i64> {
        let result = bind_values!(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(connection_error)?;
        i64::try_from(result.last_insert_id())
            .map_err(|_| StorageError::Validation("generated id out of range".into()))
    }

    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>> {
        let rows = bind_values!(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(connection_error)?;
        rows.iter().map(decode_mysql_row).collect()
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        // MySQL DDL commits implicitly, so statements run one by one.
        for statement in statements {
            sqlx::raw_sql(statement)
                .execute(&self.pool)
                .await
                .map_err(connection_error)?;
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
