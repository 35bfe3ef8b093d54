//! File-backed adapter: one pretty-printed JSON document per entry under
//! `<dir>/entries/<id>.json`.
//!
//! Every read-modify-write runs on the blocking pool while holding an
//! exclusive `fs2` lock on `<dir>/.lock`, so two processes sharing a
//! directory never allocate the same id. Documents are replaced by writing
//! a temp file and renaming it over the target.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{StorageProvider, with_search};
use crate::config::{JsonStorageConfig, StorageType};
use crate::errors::{Result, StorageError};
use crate::feed::{ChangeFeed, ChangeSource, EventCallback, Subscription};
use crate::models::{
    DevlogEntry, DevlogFilter, DevlogId, DevlogStats, PaginatedResult, TimeSeriesRequest,
    TimeSeriesStats,
};
use crate::query;

const ENTRIES_DIR: &str = "entries";
const LOCK_FILE: &str = ".lock";

/// Paths of one storage directory plus the blocking file operations on it.
#[derive(Debug, Clone)]
struct Layout {
    root: PathBuf,
}

impl Layout {
    fn entries(&self) -> PathBuf {
        self.root.join(ENTRIES_DIR)
    }

    fn entry_path(&self, id: DevlogId) -> PathBuf {
        self.entries().join(format!("{}.json", id))
    }

    fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.entries()).map_err(|e| {
            StorageError::Connection(format!(
                "cannot create storage directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Runs `f` while holding the directory lock.
    fn locked<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.create_dirs()?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        lock.lock_exclusive()?;
        let result = f();
        if let Err(err) = FileExt::unlock(&lock) {
            debug!(error = %err, "unlock of storage directory failed");
        }
        result
    }

    fn read(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        read_entry(&self.entry_path(id))
    }

    /// Every readable entry. Unparseable documents are skipped.
    fn read_all(&self) -> Result<Vec<DevlogEntry>> {
        let dir = match fs::read_dir(self.entries()) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for item in dir {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_entry(&path) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable devlog file"),
            }
        }
        Ok(entries)
    }

    fn write(&self, entry: &DevlogEntry, id: DevlogId) -> Result<()> {
        let target = self.entry_path(id);
        let tmp = self
            .entries()
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(entry)?;
        let mut file = File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
        self.locked(|| {
            let existing = self.read_all()?;
            if let Some(clash) = existing
                .iter()
                .find(|e| e.key == entry.key && e.id != entry.id)
            {
                return Err(StorageError::Validation(format!(
                    "key '{}' already used by entry {}",
                    entry.key,
                    clash.id.unwrap_or_default()
                )));
            }
            let id = match entry.id {
                Some(id) => id,
                None => next_id(&existing),
            };
            let stored = existing
                .iter()
                .find(|e| e.id == Some(id))
                .map(|e| e.updated_at);
            entry.id = Some(id);
            entry.stamp_write(stored);
            self.write(&entry, id)?;
            Ok(entry)
        })
    }

    fn archive(&self, id: DevlogId) -> Result<()> {
        self.locked(|| {
            let mut entry = self.read(id)?.ok_or(StorageError::NotFound { id })?;
            entry.archived = true;
            let stored = entry.updated_at;
            entry.stamp_write(Some(stored));
            self.write(&entry, id)
        })
    }

    fn purge(&self, id: DevlogId) -> Result<()> {
        self.locked(|| match fs::remove_file(self.entry_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound { id }),
            Err(e) => Err(e.into()),
        })
    }
}

fn read_entry(path: &Path) -> Result<Option<DevlogEntry>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut entry: DevlogEntry = serde_json::from_slice(&raw)
        .map_err(|e| StorageError::Serialization(format!("{}: {}", path.display(), e)))?;
    if entry.id.is_none() {
        entry.id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok());
    }
    Ok(Some(entry))
}

fn next_id(entries: &[DevlogEntry]) -> DevlogId {
    entries.iter().filter_map(|e| e.id).max().unwrap_or(0) + 1
}

/// [`StorageProvider`] over a directory of JSON documents.
pub struct JsonStorage {
    layout: Arc<Layout>,
    init: OnceCell<()>,
    feed: ChangeFeed,
}

impl JsonStorage {
    pub fn new(config: &JsonStorageConfig, poll_interval: Duration) -> Self {
        Self {
            layout: Arc::new(Layout {
                root: config.directory.clone(),
            }),
            init: OnceCell::new(),
            feed: ChangeFeed::new("json-storage", poll_interval),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.layout.root
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Removes the entry's file outright. Normal deletes archive instead.
    pub async fn purge(&self, id: DevlogId) -> Result<()> {
        self.ensure_initialized().await?;
        self.blocking(move |layout| layout.purge(id)).await
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.blocking(|layout| layout.create_dirs()).await?;
                info!(directory = %self.layout.root.display(), "JSON storage ready");
                Ok::<_, StorageError>(())
            })
            .await?;
        Ok(())
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Layout) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let layout = self.layout.clone();
        tokio::task::spawn_blocking(move || f(&layout))
            .await
            .context("JSON storage task panicked")?
    }

    async fn load_all(&self) -> Result<Vec<DevlogEntry>> {
        self.ensure_initialized().await?;
        self.blocking(|layout| layout.read_all()).await
    }
}

#[async_trait]
impl ChangeSource for Layout {
    async fn changed_since(&self, since: DateTime<Utc>) -> Result<Vec<DevlogEntry>> {
        let layout = self.clone();
        let entries = tokio::task::spawn_blocking(move || layout.read_all())
            .await
            .context("JSON storage task panicked")??;
        Ok(entries
            .into_iter()
            .filter(|e| !e.archived && e.updated_at >= since)
            .collect())
    }

    async fn snapshot(&self) -> Result<HashMap<DevlogId, DateTime<Utc>>> {
        let layout = self.clone();
        let entries = tokio::task::spawn_blocking(move || layout.read_all())
            .await
            .context("JSON storage task panicked")??;
        Ok(entries
            .into_iter()
            .filter(|e| !e.archived)
            .filter_map(|e| e.id.map(|id| (id, e.updated_at)))
            .collect())
    }
}

#[async_trait]
impl StorageProvider for JsonStorage {
    async fn initialize(&self) -> Result<()> {
        self.ensure_initialized().await
    }

    async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        self.ensure_initialized().await?;
        match self.blocking(move |layout| layout.read(id)).await {
            Err(StorageError::Serialization(msg)) => {
                warn!(id, error = %msg, "devlog file is corrupt");
                Ok(None)
            }
            other => other,
        }
    }

    async fn save(&self, entry: DevlogEntry) -> Result<DevlogEntry> {
        if entry.title.trim().is_empty() {
            return Err(StorageError::Validation("title must not be empty".into()));
        }
        if entry.key.trim().is_empty() {
            return Err(StorageError::Validation("key must not be empty".into()));
        }
        self.ensure_initialized().await?;
        let saved = self.blocking(move |layout| layout.save(entry)).await?;
        debug!(id = saved.id, "devlog entry written");
        Ok(saved)
    }

    async fn delete(&self, id: DevlogId) -> Result<()> {
        self.ensure_initialized().await?;
        self.blocking(move |layout| layout.archive(id)).await
    }

    async fn list(&self, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        query::apply(self.load_all().await?, filter)
    }

    async fn search(&self, query_text: &str, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        query::apply(self.load_all().await?, &with_search(filter, query_text))
    }

    async fn get_stats(&self, filter: &DevlogFilter) -> Result<DevlogStats> {
        Ok(query::compute_stats(&self.load_all().await?, filter))
    }

    async fn get_time_series_stats(&self, request: &TimeSeriesRequest) -> Result<TimeSeriesStats> {
        let range = request.resolve(Utc::now().date_naive())?;
        Ok(query::compute_time_series(&self.load_all().await?, range))
    }

    async fn get_next_id(&self) -> Result<DevlogId> {
        Ok(next_id(&self.load_all().await?))
    }

    async fn subscribe(&self, callback: EventCallback) -> Result<Subscription> {
        self.ensure_initialized().await?;
        let source: Arc<dyn ChangeSource> = self.layout.clone();
        self.feed.subscribe(source, callback).await
    }

    async fn cleanup(&self) -> Result<()> {
        self.feed.stop();
        Ok(())
    }

    fn is_remote_storage(&self) -> bool {
        false
    }

    fn is_git_based(&self) -> bool {
        false
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Json
    }
}
