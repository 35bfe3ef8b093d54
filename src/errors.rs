//! Typed error hierarchy for the storage layer.
//!
//! Every provider, the factory and the workspace manager return
//! [`StorageError`]. Adapters translate backend failures (SQL drivers,
//! HTTP, filesystem) into the variants below so callers can react to the
//! category without knowing which backend is active.

use thiserror::Error;

use crate::models::DevlogId;

/// Errors surfaced by storage providers and the layers built on them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable, authentication rejected or pool exhausted.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema creation or migration failed.
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Devlog entry {id} not found")]
    NotFound { id: DevlogId },

    #[error("Workspace '{0}' not found")]
    WorkspaceNotFound(String),

    /// Input rejected: bad pagination, duplicate key, invalid transition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote budget exhausted and retries did not recover.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("GitHub API error ({status}): {message}")]
    GitHub { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// True for failures worth retrying against the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::RateLimit(_))
            || matches!(self, Self::GitHub { status, .. } if *status >= 500)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Self::Validation(err.to_string());
            }
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::CannotOpen =>
            {
                return Self::Connection(err.to_string());
            }
            _ => {}
        }
        Self::Other(anyhow::Error::new(err).context("SQLite error"))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Validation(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            sqlx::Error::Tls(_) => Self::Connection(err.to_string()),
            _ => Self::Other(anyhow::Error::new(err).context("SQL error")),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Other(anyhow::Error::new(err).context("HTTP request failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StorageError::NotFound { id: 42 };
        assert_eq!(err.to_string(), "Devlog entry 42 not found");
    }

    #[test]
    fn github_error_display() {
        let err = StorageError::GitHub {
            status: 422,
            message: "Validation Failed".into(),
        };
        assert_eq!(err.to_string(), "GitHub API error (422): Validation Failed");
    }

    #[test]
    fn serde_errors_map_to_serialization() {
        let err: StorageError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn anyhow_errors_convert_via_from() {
        let err: StorageError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, StorageError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn transient_classification() {
        assert!(StorageError::Connection("down".into()).is_transient());
        assert!(StorageError::RateLimit("slow down".into()).is_transient());
        assert!(
            StorageError::GitHub {
                status: 502,
                message: "bad gateway".into()
            }
            .is_transient()
        );
        assert!(!StorageError::Validation("bad".into()).is_transient());
        assert!(!StorageError::NotFound { id: 1 }.is_transient());
    }

    #[test]
    fn sqlite_constraint_violation_is_validation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: StorageError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<StorageError>();
    }
}
