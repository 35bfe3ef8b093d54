use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::{Result, StorageError};

/// SQL flavour spoken by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    /// Placeholder for the `n`th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${}", n),
            Self::Sqlite | Self::Mysql => "?".to_string(),
        }
    }

    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Sqlite, true) => "1",
            (Self::Sqlite, false) => "0",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }

    /// UTC calendar day of a timestamp expression.
    pub fn day_of(&self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("date({})", expr),
            Self::Postgres => format!("(({}) AT TIME ZONE 'UTC')::date", expr),
            Self::Mysql => format!("DATE({})", expr),
        }
    }
}

/// Column type, used to bind typed NULLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Int,
    Real,
    Text,
    Bool,
    Json,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(SqlType),
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(Self::Null(SqlType::Text), |v| Self::Text(v.to_string()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

/// One result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    columns: HashMap<String, SqlValue>,
}

fn missing(column: &str) -> StorageError {
    StorageError::Serialization(format!("column '{}' missing from row", column))
}

fn mistyped(column: &str, expected: &str, got: &SqlValue) -> StorageError {
    StorageError::Serialization(format!(
        "column '{}' expected {}, got {:?}",
        column, expected, got
    ))
}

impl SqlRow {
    pub fn new(columns: HashMap<String, SqlValue>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.get(column).ok_or_else(|| missing(column))? {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::Real(v) => Ok(*v as i64),
            SqlValue::Bool(v) => Ok(i64::from(*v)),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| mistyped(column, "integer", &SqlValue::Text(s.clone()))),
            other => Err(mistyped(column, "integer", other)),
        }
    }

    pub fn get_opt_f64(&self, column: &str) -> Result<Option<f64>> {
        match self.get(column).ok_or_else(|| missing(column))? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Real(v) => Ok(Some(*v)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            SqlValue::Text(s) => Ok(s.trim().parse().ok()),
            other => Err(mistyped(column, "float", other)),
        }
    }

    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.get(column).ok_or_else(|| missing(column))? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            SqlValue::Int(v) => Ok(Some(v.to_string())),
            SqlValue::Json(v) => Ok(Some(v.to_string())),
            other => Err(mistyped(column, "text", other)),
        }
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        self.get_opt_string(column)?
            .ok_or_else(|| mistyped(column, "text", &SqlValue::Null(SqlType::Text)))
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.get(column).ok_or_else(|| missing(column))? {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v != 0),
            SqlValue::Text(s) => Ok(matches!(s.as_str(), "1" | "true" | "TRUE" | "t")),
            SqlValue::Null(_) => Ok(false),
            other => Err(mistyped(column, "boolean", other)),
        }
    }

    pub fn get_opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get(column).ok_or_else(|| missing(column))? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(*ts)),
            SqlValue::Text(s) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| mistyped(column, "timestamp", &SqlValue::Text(s.clone()))),
            other => Err(mistyped(column, "timestamp", other)),
        }
    }

    pub fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        self.get_opt_timestamp(column)?
            .ok_or_else(|| mistyped(column, "timestamp", &SqlValue::Null(SqlType::Timestamp)))
    }

    /// JSON column value; text columns are parsed.
    pub fn get_json(&self, column: &str) -> Result<Option<serde_json::Value>> {
        match self.get(column).ok_or_else(|| missing(column))? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Json(v) => Ok(Some(v.clone())),
            SqlValue::Text(s) if s.is_empty() => Ok(None),
            SqlValue::Text(s) => Ok(Some(serde_json::from_str(s)?)),
            other => Err(mistyped(column, "json", other)),
        }
    }
}

/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS[.fff]` form SQL engines
/// produce for naive timestamps (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Minimal execution surface shared by the SQLite, PostgreSQL and MySQL
/// engines.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Runs a statement; returns affected rows.
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64>;

    /// Runs an INSERT and returns the generated id. PostgreSQL statements
    /// must end in `RETURNING id`.
    async fn insert(&self, sql: &str, params: Vec<SqlValue>) -> Result<i64>;

    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>>;

    /// Unparameterized DDL, in order.
    async fn execute_batch(&self, statements: &[String]) -> Result<()>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, SqlValue)]) -> SqlRow {
        SqlRow::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::Mysql.placeholder(1), "?");
    }

    #[test]
    fn lenient_accessors() {
        let r = row(&[
            ("n", SqlValue::Text("12".into())),
            ("flag", SqlValue::Int(1)),
            ("ts", SqlValue::Text("2024-02-03 04:05:06.789".into())),
            ("doc", SqlValue::Text("[1,2]".into())),
            ("gone", SqlValue::Null(SqlType::Text)),
        ]);
        assert_eq!(r.get_i64("n").unwrap(), 12);
        assert!(r.get_bool("flag").unwrap());
        assert_eq!(
            r.get_timestamp("ts").unwrap().to_rfc3339(),
            "2024-02-03T04:05:06.789+00:00"
        );
        assert_eq!(r.get_json("doc").unwrap(), Some(serde_json::json!([1, 2])));
        assert_eq!(r.get_opt_string("gone").unwrap(), None);
        assert!(r.get_string("gone").is_err());
        assert!(r.get_i64("absent").is_err());
    }

    #[test]
    fn rfc3339_timestamps_parse() {
        let ts = parse_timestamp("2024-01-01T10:00:00.000Z").unwrap();
        assert_eq!(ts.timestamp(), 1_704_103_200);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
