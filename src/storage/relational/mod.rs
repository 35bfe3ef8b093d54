//! Relational adapter over SQLite, PostgreSQL and MySQL.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `engine` | `SqlEngine` trait, typed values and rows |
//! | `sqlite` | rusqlite engine on the blocking pool |
//! | `server` | sqlx engines for PostgreSQL and MySQL |
//! | `schema` | idempotent DDL per dialect |
//! | `mapper` | entity ↔ row conversion |
//! | `sql` | filter → SQL, time-series query |

pub mod engine;
pub mod mapper;
pub mod schema;
pub mod server;
pub mod sql;
pub mod sqlite;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use self::engine::{Dialect, SqlEngine, SqlRow, SqlValue};
use self::server::{MysqlEngine, PostgresEngine};
use self::sql::SearchMode;
use self::sqlite::SqliteEngine;
use super::{StorageProvider, with_search};
use crate::config::{StorageOptions, StorageType};
use crate::errors::{Result, StorageError};
use crate::feed::{ChangeFeed, ChangeSource, EventCallback, Subscription};
use crate::models::{
    DateRange, DevlogEntry, DevlogFilter, DevlogId, DevlogPriority, DevlogStats, DevlogStatus,
    DevlogType, PaginatedResult, PaginationMeta, TimeSeriesDataPoint, TimeSeriesRequest,
    TimeSeriesStats, now_millis,
};
use crate::query;

struct Inner {
    engine: Arc<dyn SqlEngine>,
    init: OnceCell<()>,
    fts: AtomicBool,
    writes: Mutex<()>,
}

/// [`StorageProvider`] backed by a SQL database.
pub struct RelationalStorage {
    inner: Arc<Inner>,
    feed: ChangeFeed,
}

impl RelationalStorage {
    pub fn from_engine(engine: Arc<dyn SqlEngine>, poll_interval: Duration) -> Self {
        let label = format!("{}-storage", engine.dialect().as_str());
        Self {
            inner: Arc::new(Inner {
                engine,
                init: OnceCell::new(),
                fts: AtomicBool::new(false),
                writes: Mutex::new(()),
            }),
            feed: ChangeFeed::new(label, poll_interval),
        }
    }

    pub fn sqlite(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self> {
        let engine = SqliteEngine::open(path.as_ref())?;
        Ok(Self::from_engine(Arc::new(engine), poll_interval))
    }

    pub fn sqlite_in_memory() -> Result<Self> {
        let engine = SqliteEngine::open_in_memory()?;
        Ok(Self::from_engine(Arc::new(engine), Duration::from_secs(2)))
    }

    pub fn postgres(url: &str, options: &StorageOptions, poll_interval: Duration) -> Result<Self> {
        let engine = PostgresEngine::connect_lazy(url, options)?;
        Ok(Self::from_engine(Arc::new(engine), poll_interval))
    }

    pub fn mysql(url: &str, options: &StorageOptions, poll_interval: Duration) -> Result<Self> {
        let engine = MysqlEngine::connect_lazy(url, options)?;
        Ok(Self::from_engine(Arc::new(engine), poll_interval))
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.engine.dialect()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Whether SQLite full-text search is active (false on other dialects).
    pub fn full_text_enabled(&self) -> bool {
        self.inner.fts.load(Ordering::Relaxed)
    }

    /// Time series computed by a single dialect query.
    pub async fn time_series_sql(&self, range: DateRange) -> Result<TimeSeriesStats> {
        self.inner.ensure_initialized().await?;
        self.inner.time_series_sql(range).await
    }

    /// Time series computed in process from every non-archived row.
    pub async fn time_series_in_process(&self, range: DateRange) -> Result<TimeSeriesStats> {
        self.inner.ensure_initialized().await?;
        let entries = self.inner.select_all(&DevlogFilter::default()).await?;
        Ok(query::compute_time_series(&entries, range))
    }
}

impl Inner {
    fn dialect(&self) -> Dialect {
        self.engine.dialect()
    }

    fn search_mode(&self) -> SearchMode {
        SearchMode::for_dialect(self.dialect(), self.fts.load(Ordering::Relaxed))
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.init.get_or_try_init(|| self.migrate()).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        let dialect = self.dialect();
        self.engine
            .execute_batch(&schema::statements(dialect))
            .await
            .map_err(|err| match err {
                StorageError::Connection(_) => err,
                other => StorageError::Schema(other.to_string()),
            })?;

        if dialect == Dialect::Sqlite {
            self.enable_fts().await;
        }
        info!(dialect = dialect.as_str(), fts = self.fts.load(Ordering::Relaxed), "devlog schema ready");
        Ok(())
    }

    async fn enable_fts(&self) {
        let existed = match self
            .engine
            .query(
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
                vec![SqlValue::text(schema::FTS_TABLE)],
            )
            .await
            .and_then(|rows| rows.first().map_or(Ok(0), |r| r.get_i64("n")))
        {
            Ok(n) => n > 0,
            Err(err) => {
                warn!(error = %err, "cannot inspect SQLite schema, full-text search disabled");
                return;
            }
        };

        if let Err(err) = self.engine.execute_batch(&schema::sqlite_fts()).await {
            warn!(error = %err, "FTS5 unavailable, falling back to LIKE search");
            return;
        }
        if !existed
            && let Err(err) = self.engine.execute(&schema::sqlite_fts_rebuild(), vec![]).await
        {
            warn!(error = %err, "FTS5 rebuild failed, falling back to LIKE search");
            return;
        }
        self.fts.store(true, Ordering::Relaxed);
    }

    async fn fetch_one(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        let (sql, params) = sql::select_by_id(self.dialect(), id);
        let rows = self.engine.query(&sql, params).await?;
        rows.first().map(mapper::entry_from_row).transpose()
    }

    async fn id_exists(&self, id: DevlogId) -> Result<bool> {
        let (sql, params) = sql::exists(self.dialect(), id);
        Ok(!self.engine.query(&sql, params).await?.is_empty())
    }

    /// Persisted `updated_at` of `id`, `None` when the row is missing.
    async fn stored_updated_at(&self, id: DevlogId) -> Result<Option<DateTime<Utc>>> {
        let (sql, params) = sql::exists(self.dialect(), id);
        self.engine
            .query(&sql, params)
            .await?
            .first()
            .map(|row| row.get_timestamp("updated_at"))
            .transpose()
    }

    async fn select_all(&self, filter: &DevlogFilter) -> Result<Vec<DevlogEntry>> {
        let (sql, params) = sql::select_all(self.dialect(), filter, self.search_mode());
        let rows = self.engine.query(&sql, params).await?;
        rows.iter().map(mapper::entry_from_row).collect()
    }

    async fn list(&self, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        let pagination = filter.page()?;
        let dialect = self.dialect();
        let mode = self.search_mode();

        let (count_sql, count_params) = sql::count(dialect, filter, mode);
        let total = self
            .engine
            .query(&count_sql, count_params)
            .await?
            .first()
            .map_or(Ok(0), |row| row.get_i64("total"))?;

        let (page_sql, page_params) = sql::select_page(dialect, filter, &pagination, mode);
        let rows = self.engine.query(&page_sql, page_params).await?;
        let items = rows
            .iter()
            .map(mapper::entry_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(PaginatedResult {
            items,
            pagination: PaginationMeta::new(
                pagination.page,
                pagination.limit,
                u64::try_from(total).unwrap_or(0),
            ),
        })
    }

    async fn counts<T>(&self, filter: &DevlogFilter, column: &str) -> Result<Vec<(T, u64)>>
    where
        T: std::str::FromStr<Err = String>,
    {
        let (sql, params) = sql::group_counts(self.dialect(), filter, self.search_mode(), column);
        let rows = self.engine.query(&sql, params).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let bucket = row.get_string("bucket")?;
            let n = u64::try_from(row.get_i64("n")?).unwrap_or(0);
            match bucket.parse::<T>() {
                Ok(value) => out.push((value, n)),
                Err(err) => warn!(column, error = %err, "skipping unknown bucket in stats"),
            }
        }
        Ok(out)
    }

    async fn stats(&self, filter: &DevlogFilter) -> Result<DevlogStats> {
        let by_status = self.counts::<DevlogStatus>(filter, "status").await?;
        let by_type = self.counts::<DevlogType>(filter, "entry_type").await?;
        let by_priority = self.counts::<DevlogPriority>(filter, "priority").await?;

        let (sql, params) = sql::average_completion(self.dialect(), filter, self.search_mode());
        let average = match self.engine.query(&sql, params).await {
            Ok(rows) => rows
                .first()
                .map(|row| row.get_opt_f64("avg_hours"))
                .transpose()?
                .flatten(),
            Err(err) => {
                warn!(error = %err, "average completion query failed");
                None
            }
        };

        Ok(DevlogStats::from_counts(by_status, by_type, by_priority, average))
    }

    async fn time_series_sql(&self, range: DateRange) -> Result<TimeSeriesStats> {
        let (sql, params) = sql::time_series(self.dialect(), range);
        let rows = self.engine.query(&sql, params).await?;
        let data_points = rows
            .iter()
            .map(data_point_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(TimeSeriesStats {
            data_points,
            date_range: range,
        })
    }

    async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
        if entry.title.trim().is_empty() {
            return Err(StorageError::Validation("title must not be empty".into()));
        }
        if entry.key.trim().is_empty() {
            return Err(StorageError::Validation("key must not be empty".into()));
        }

        let dialect = self.dialect();
        let _guard = self.writes.lock().await;
        let stored = match entry.id {
            Some(id) => self.stored_updated_at(id).await?,
            None => None,
        };
        entry.stamp_write(stored);
        let values = mapper::entry_values(dialect, &entry)?;

        let id = match entry.id {
            Some(id) if stored.is_some() => {
                let (sql, params) = sql::update(dialect, id, values);
                self.engine.execute(&sql, params).await?;
                debug!(id, "devlog entry updated");
                id
            }
            Some(id) => {
                let (sql, params) = sql::insert(dialect, Some(id), values);
                self.engine.insert(&sql, params).await?;
                if dialect == Dialect::Postgres {
                    self.engine.query(&sql::sync_sequence(), vec![]).await?;
                }
                debug!(id, "devlog entry inserted with explicit id");
                id
            }
            None => {
                let (sql, params) = sql::insert(dialect, None, values);
                let id = self.engine.insert(&sql, params).await?;
                debug!(id, "devlog entry created");
                id
            }
        };

        entry.id = Some(id);
        Ok(entry)
    }

    async fn archive(&self, id: DevlogId) -> Result<()> {
        let _guard = self.writes.lock().await;
        let (sql, params) = sql::archive(self.dialect(), id, now_millis());
        let changed = self.engine.execute(&sql, params).await?;
        if changed == 0 {
            return Err(StorageError::NotFound { id });
        }
        debug!(id, "devlog entry archived");
        Ok(())
    }
}

fn data_point_from_row(row: &SqlRow) -> Result<TimeSeriesDataPoint> {
    let raw_date = row.get_string("bucket_date")?;
    let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .map_err(|e| StorageError::Serialization(format!("bad bucket date '{}': {}", raw_date, e)))?;
    let count = |column: &str| -> Result<u64> { Ok(u64::try_from(row.get_i64(column)?).unwrap_or(0)) };

    let mut point = TimeSeriesDataPoint {
        date,
        total_created: count("total_created")?,
        total_completed: count("total_completed")?,
        total_closed: count("total_closed")?,
        daily_created: count("daily_created")?,
        daily_completed: count("daily_completed")?,
        ..TimeSeriesDataPoint::default()
    };
    for status in DevlogStatus::ALL {
        *point.status_count_mut(status) = count(sql::status_column(status))?;
    }
    point.open = point.total_created.saturating_sub(point.total_closed);
    Ok(point)
}

#[async_trait]
impl ChangeSource for Inner {
    async fn changed_since(&self, since: DateTime<Utc>) -> Result<Vec<DevlogEntry>> {
        let filter = DevlogFilter {
            updated_since: Some(since),
            ..DevlogFilter::default()
        };
        self.select_all(&filter).await
    }

    async fn snapshot(&self) -> Result<HashMap<DevlogId, DateTime<Utc>>> {
        let rows = self
            .engine
            .query(&sql::snapshot(self.dialect()), vec![])
            .await?;
        rows.iter()
            .map(|row| Ok((row.get_i64("id")?, row.get_timestamp("updated_at")?)))
            .collect()
    }
}

#[async_trait]
impl StorageProvider for RelationalStorage {
    async fn initialize(&self) -> Result<()> {
        self.inner.ensure_initialized().await
    }

    async fn exists(&self, id: DevlogId) -> Result<bool> {
        self.inner.ensure_initialized().await?;
        self.inner.id_exists(id).await
    }

    async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        self.inner.ensure_initialized().await?;
        self.inner.fetch_one(id).await
    }

    async fn save(&self, entry: DevlogEntry) -> Result<DevlogEntry> {
        self.inner.ensure_initialized().await?;
        self.inner.save(entry).await
    }

    async fn delete(&self, id: DevlogId) -> Result<()> {
        self.inner.ensure_initialized().await?;
        self.inner.archive(id).await
    }

    async fn list(&self, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        self.inner.ensure_initialized().await?;
        self.inner.list(filter).await
    }

    async fn search(&self, query: &str, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        self.inner.ensure_initialized().await?;
        self.inner.list(&with_search(filter, query)).await
    }

    async fn get_stats(&self, filter: &DevlogFilter) -> Result<DevlogStats> {
        self.inner.ensure_initialized().await?;
        self.inner.stats(filter).await
    }

    async fn get_time_series_stats(&self, request: &TimeSeriesRequest) -> Result<TimeSeriesStats> {
        let range = request.resolve(Utc::now().date_naive())?;
        self.inner.ensure_initialized().await?;
        match self.inner.time_series_sql(range).await {
            Ok(stats) => Ok(stats),
            Err(err) => {
                warn!(error = %err, "time series query failed, computing in process");
                self.time_series_in_process(range).await
            }
        }
    }

    async fn get_next_id(&self) -> Result<DevlogId> {
        self.inner.ensure_initialized().await?;
        let rows = self.inner.engine.query(&sql::next_id(), vec![]).await?;
        rows.first().map_or(Ok(1), |row| row.get_i64("next_id"))
    }

    async fn subscribe(&self, callback: EventCallback) -> Result<Subscription> {
        self.inner.ensure_initialized().await?;
        let source: Arc<dyn ChangeSource> = self.inner.clone();
        self.feed.subscribe(source, callback).await
    }

    async fn cleanup(&self) -> Result<()> {
        self.feed.stop();
        self.inner.engine.close().await;
        Ok(())
    }

    fn is_remote_storage(&self) -> bool {
        false
    }

    fn is_git_based(&self) -> bool {
        false
    }

    fn storage_type(&self) -> StorageType {
        match self.dialect() {
            Dialect::Sqlite => StorageType::Sqlite,
            Dialect::Postgres => StorageType::Postgres,
            Dialect::Mysql => StorageType::Mysql,
        }
    }
}
