//! Storage provider contract and its backends.
//!
//! | Backend | Module | Identity | Delete | Poll |
//! |---------|--------|----------|--------|------|
//! | JSON files | [`json`] | max+1 | archive flag | 2 s |
//! | SQLite / MySQL / PostgreSQL | [`relational`] | auto-increment | archive flag | 2 s / 3 s |
//! | GitHub Issues | [`github`] | issue number | close `not_planned`, strip labels | 30 s |
//!
//! Every provider is constructed cheaply and initializes lazily: the first
//! operation runs `initialize()` when nobody has yet.

pub mod github;
pub mod json;
pub mod relational;

use async_trait::async_trait;

use crate::config::StorageType;
use crate::errors::Result;
use crate::feed::{EventCallback, Subscription};
use crate::models::{
    DevlogEntry, DevlogFilter, DevlogId, DevlogStats, PaginatedResult, TimeSeriesRequest,
    TimeSeriesStats,
};

pub use github::GitHubStorage;
pub use json::JsonStorage;
pub use relational::RelationalStorage;

/// Uniform persistence contract over every backend.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Creates schema, directories or labels. Safe to call repeatedly.
    async fn initialize(&self) -> Result<()>;

    async fn exists(&self, id: DevlogId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Entry by id, archived or not.
    async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>>;

    /// Full-entity upsert. Returns the persisted entry with its id.
    async fn save(&self, entry: DevlogEntry) -> Result<DevlogEntry>;

    /// Soft delete; `NotFound` when the id is unknown.
    async fn delete(&self, id: DevlogId) -> Result<()>;

    async fn list(&self, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>>;

    /// Free-text search over title and description. Each whitespace
    /// separated term must prefix a word (SQLite FTS5, MySQL and the
    /// in-process matcher). Without a full-text index (PostgreSQL, SQLite
    /// builds lacking FTS5) the whole query is a case-insensitive substring
    /// match. GitHub delegates to its search API.
    async fn search(&self, query: &str, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>>;

    /// Aggregates over the unpaginated filtered set.
    async fn get_stats(&self, filter: &DevlogFilter) -> Result<DevlogStats>;

    async fn get_time_series_stats(&self, request: &TimeSeriesRequest) -> Result<TimeSeriesStats>;

    /// Next id under this backend's identity strategy. Not a reservation.
    async fn get_next_id(&self) -> Result<DevlogId>;

    async fn subscribe(&self, callback: EventCallback) -> Result<Subscription>;

    /// Stops polling and releases connections. Repeatable.
    async fn cleanup(&self) -> Result<()>;

    fn is_remote_storage(&self) -> bool;

    fn is_git_based(&self) -> bool;

    fn storage_type(&self) -> StorageType;
}

/// Copies `query` into the filter's search field.
pub(crate) fn with_search(filter: &DevlogFilter, query: &str) -> DevlogFilter {
    let mut filter = filter.clone();
    filter.search = Some(query.to_string());
    filter
}
