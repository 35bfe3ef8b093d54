//! Entity ↔ row mapping.
//!
//! JSON-valued fields are stored as text on SQLite and as native JSON on
//! PostgreSQL/MySQL. A field that fails to deserialize degrades to its
//! empty default with a warning rather than failing the whole read.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::engine::{Dialect, SqlRow, SqlType, SqlValue};
use crate::errors::Result;
use crate::models::{DevlogEntry, DevlogPriority, DevlogStatus, DevlogType};

pub const COLUMNS: &str = "id, entry_key, title, entry_type, description, status, priority, \
     assignee, archived, created_at, updated_at, closed_at, files, related_devlogs, context, \
     ai_context, notes, external_references";

pub fn timestamp(dialect: Dialect, ts: DateTime<Utc>) -> SqlValue {
    match dialect {
        Dialect::Sqlite => SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        _ => SqlValue::Timestamp(ts),
    }
}

fn opt_timestamp(dialect: Dialect, ts: Option<DateTime<Utc>>) -> SqlValue {
    match ts {
        Some(ts) => timestamp(dialect, ts),
        None if dialect == Dialect::Sqlite => SqlValue::Null(SqlType::Text),
        None => SqlValue::Null(SqlType::Timestamp),
    }
}

pub fn boolean(dialect: Dialect, value: bool) -> SqlValue {
    match dialect {
        Dialect::Sqlite => SqlValue::Int(i64::from(value)),
        _ => SqlValue::Bool(value),
    }
}

fn json<T: Serialize>(dialect: Dialect, value: &T) -> Result<SqlValue> {
    let value = serde_json::to_value(value)?;
    Ok(match dialect {
        Dialect::Sqlite => SqlValue::Text(value.to_string()),
        _ => SqlValue::Json(value),
    })
}

/// Column/value pairs for every persisted field except `id`.
pub fn entry_values(dialect: Dialect, entry: &DevlogEntry) -> Result<Vec<(&'static str, SqlValue)>> {
    Ok(vec![
        ("entry_key", SqlValue::text(&entry.key)),
        ("title", SqlValue::text(&entry.title)),
        ("entry_type", SqlValue::text(entry.entry_type.as_str())),
        ("description", SqlValue::text(&entry.description)),
        ("status", SqlValue::text(entry.status.as_str())),
        ("priority", SqlValue::text(entry.priority.as_str())),
        ("assignee", SqlValue::opt_text(entry.assignee.as_deref())),
        ("archived", boolean(dialect, entry.archived)),
        ("created_at", timestamp(dialect, entry.created_at)),
        ("updated_at", timestamp(dialect, entry.updated_at)),
        ("closed_at", opt_timestamp(dialect, entry.closed_at)),
        ("files", json(dialect, &entry.files)?),
        ("related_devlogs", json(dialect, &entry.related_devlogs)?),
        ("context", json(dialect, &entry.context)?),
        ("ai_context", json(dialect, &entry.ai_context)?),
        ("notes", json(dialect, &entry.notes)?),
        ("external_references", json(dialect, &entry.external_references)?),
    ])
}

fn json_field<T: DeserializeOwned + Default>(row: &SqlRow, column: &str, id: i64) -> T {
    let value = match row.get_json(column) {
        Ok(Some(value)) => value,
        Ok(None) => return T::default(),
        Err(err) => {
            warn!(id, column, error = %err, "unreadable JSON column, using default");
            return T::default();
        }
    };
    serde_json::from_value(value).unwrap_or_else(|err| {
        warn!(id, column, error = %err, "malformed JSON column, using default");
        T::default()
    })
}

fn enum_field<T: std::str::FromStr<Err = String>>(row: &SqlRow, column: &str, id: i64, fallback: T) -> Result<T> {
    let raw = row.get_string(column)?;
    Ok(raw.parse().unwrap_or_else(|err: String| {
        warn!(id, column, error = %err, "unknown enum value, using fallback");
        fallback
    }))
}

pub fn entry_from_row(row: &SqlRow) -> Result<DevlogEntry> {
    let id = row.get_i64("id")?;
    Ok(DevlogEntry {
        id: Some(id),
        key: row.get_string("entry_key")?,
        title: row.get_string("title")?,
        entry_type: enum_field(row, "entry_type", id, DevlogType::Task)?,
        description: row.get_opt_string("description")?.unwrap_or_default(),
        status: enum_field(row, "status", id, DevlogStatus::New)?,
        priority: enum_field(row, "priority", id, DevlogPriority::Medium)?,
        created_at: row.get_timestamp("created_at")?,
        updated_at: row.get_timestamp("updated_at")?,
        closed_at: row.get_opt_timestamp("closed_at")?,
        assignee: row.get_opt_string("assignee")?,
        archived: row.get_bool("archived")?,
        notes: json_field(row, "notes", id),
        files: json_field(row, "files", id),
        related_devlogs: json_field(row, "related_devlogs", id),
        context: json_field(row, "context", id),
        ai_context: json_field(row, "ai_context", id),
        external_references: json_field(row, "external_references", id),
    })
}
