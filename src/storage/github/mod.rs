//! GitHub Issues adapter.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `client` | REST calls, retry, wire types |
//! | `rate_limit` | hourly budget + server headers |
//! | `cache` | LRU/TTL cache for GET responses |
//! | `metadata` | base64 JSON blocks in bodies and comments |
//! | `mapper` | labels, state, titles, issue → entry |
//!
//! An entry is an issue: the description and a hidden metadata block form
//! the body, classification lives in labels and `state`/`state_reason`, and
//! each note is one comment. Issue numbers are entry ids.

pub mod cache;
pub mod client;
pub mod mapper;
pub mod metadata;
pub mod rate_limit;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use self::client::{GitHubClient, GitHubIssue, IssuePayload};
use super::StorageProvider;
use crate::config::{GitHubStorageConfig, StorageType};
use crate::errors::{Result, StorageError};
use crate::feed::{ChangeFeed, ChangeSource, EventCallback, Subscription};
use crate::models::{
    DevlogEntry, DevlogFilter, DevlogId, DevlogNote, DevlogStats, PaginatedResult,
    TimeSeriesRequest, TimeSeriesStats, truncate_millis,
};
use crate::query;

/// Remote `updated_at` values come from GitHub's clock.
const FEED_OVERLAP: Duration = Duration::from_secs(60);

struct GitHubInner {
    client: GitHubClient,
    config: GitHubStorageConfig,
    init: OnceCell<()>,
}

/// [`StorageProvider`] backed by the issues of one GitHub repository.
pub struct GitHubStorage {
    inner: Arc<GitHubInner>,
    feed: ChangeFeed,
}

impl GitHubStorage {
    pub fn new(config: GitHubStorageConfig, poll_interval: Duration) -> Result<Self> {
        let client = GitHubClient::new(&config)?;
        let label = format!("github-storage:{}", client.repo_slug());
        Ok(Self {
            inner: Arc::new(GitHubInner {
                client,
                config,
                init: OnceCell::new(),
            }),
            feed: ChangeFeed::new(label, poll_interval).with_overlap(FEED_OVERLAP),
        })
    }

    pub fn config(&self) -> &GitHubStorageConfig {
        &self.inner.config
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

impl GitHubInner {
    async fn ensure_initialized(&self) -> Result<()> {
        self.init.get_or_try_init(|| self.verify_and_bootstrap()).await?;
        Ok(())
    }

    async fn verify_and_bootstrap(&self) -> Result<()> {
        let slug = self.client.repo_slug();
        self.client.get_repository().await.map_err(|err| match err {
            StorageError::GitHub { status: 404, .. } => {
                StorageError::Connection(format!("repository {} not found or not accessible", slug))
            }
            StorageError::GitHub { status: 403, message } => {
                StorageError::Connection(format!("access to {} denied: {}", slug, message))
            }
            other => other,
        })?;

        match self.client.list_label_names().await {
            Ok(existing) => {
                let existing: HashSet<String> = existing.iter().map(|n| n.to_ascii_lowercase()).collect();
                for (name, color) in mapper::managed_labels(&self.config) {
                    if existing.contains(&name.to_ascii_lowercase()) {
                        continue;
                    }
                    if let Err(err) = self.client.create_label(&name, color, "Managed by devlog").await {
                        warn!(label = %name, error = %err, "could not create GitHub label");
                    }
                }
            }
            Err(err) => warn!(error = %err, "could not list GitHub labels, skipping bootstrap"),
        }
        info!(repo = slug, "GitHub storage ready");
        Ok(())
    }

    fn to_entry(&self, issue: &GitHubIssue) -> DevlogEntry {
        mapper::issue_to_entry(issue, &[], &self.config)
    }

    /// Managed entries without notes.
    async fn load_entries(&self, fresh: bool) -> Result<Vec<DevlogEntry>> {
        let issues = self.client.list_issues(None, fresh).await?;
        Ok(issues
            .iter()
            .filter(|issue| mapper::is_devlog_issue(issue, &self.config))
            .map(|issue| self.to_entry(issue))
            .collect())
    }

    async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        let Some(issue) = self.client.get_issue(id, false).await? else {
            return Ok(None);
        };
        if issue.is_pull_request() {
            return Ok(None);
        }
        let comments = self.client.list_comments(id, false).await?;
        Ok(Some(mapper::issue_to_entry(&issue, &comments, &self.config)))
    }

    async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
        let existing = match entry.id {
            Some(id) => self
                .client
                .get_issue(id, true)
                .await?
                .filter(|issue| !issue.is_pull_request()),
            None => None,
        };
        entry.stamp_write(existing.as_ref().map(|issue| truncate_millis(issue.updated_at)));
        let payload = mapper::issue_payload(&entry, &self.config)?;

        let issue = match existing {
            Some(issue) => self.client.update_issue(issue.number, &payload).await?,
            None => {
                if let Some(placeholder) = entry.id {
                    debug!(placeholder, "no issue for id, creating one");
                }
                // Issues are always created open.
                let create = IssuePayload {
                    state: None,
                    state_reason: None,
                    ..payload.clone()
                };
                let created = self.client.create_issue(&create).await?;
                if payload.state.as_deref() == Some("closed") {
                    let close = IssuePayload {
                        state: payload.state.clone(),
                        state_reason: payload.state_reason.clone(),
                        ..IssuePayload::default()
                    };
                    self.client.update_issue(created.number, &close).await?
                } else {
                    created
                }
            }
        };

        entry.id = Some(issue.number);
        // GitHub owns the timestamp the change feed compares against.
        entry.updated_at = truncate_millis(issue.updated_at);
        self.sync_notes(issue.number, &mut entry.notes).await;
        debug!(number = issue.number, "devlog issue saved");
        Ok(entry)
    }

    /// Reconciles notes with the issue's managed comments: changed bodies
    /// are updated, new notes become comments (taking the comment id), and
    /// managed comments without a note are deleted. Failures are logged per
    /// note.
    async fn sync_notes(&self, number: i64, notes: &mut [DevlogNote]) {
        let comments = match self.client.list_comments(number, true).await {
            Ok(comments) => comments,
            Err(err) => {
                warn!(number, error = %err, "cannot list comments, notes not synced");
                return;
            }
        };
        let managed: HashMap<String, (i64, String)> = comments
            .iter()
            .filter(|c| mapper::comment_to_note(c).is_some())
            .map(|c| (c.id.to_string(), (c.id, c.body.clone().unwrap_or_default())))
            .collect();

        let mut kept = HashSet::new();
        for note in notes.iter_mut() {
            let body = match metadata::encode_note(note) {
                Ok(body) => body,
                Err(err) => {
                    warn!(number, note = %note.id, error = %err, "cannot encode note");
                    continue;
                }
            };
            match managed.get(&note.id) {
                Some((comment_id, current)) => {
                    kept.insert(*comment_id);
                    if current.trim() == body.trim() {
                        continue;
                    }
                    if let Err(err) = self.client.update_comment(number, *comment_id, &body).await {
                        warn!(number, comment_id, error = %err, "cannot update note comment");
                    }
                }
                None => match self.client.create_comment(number, &body).await {
                    Ok(comment) => {
                        kept.insert(comment.id);
                        note.id = comment.id.to_string();
                        note.timestamp = truncate_millis(comment.created_at);
                    }
                    Err(err) => warn!(number, note = %note.id, error = %err, "cannot create note comment"),
                },
            }
        }

        for (comment_id, _) in managed.values() {
            if kept.contains(comment_id) {
                continue;
            }
            if let Err(err) = self.client.delete_comment(number, *comment_id).await {
                warn!(number, comment_id, error = %err, "cannot delete orphaned note comment");
            }
        }
    }

    async fn delete(&self, id: DevlogId) -> Result<()> {
        match self.client.get_issue(id, true).await? {
            Some(issue) if !issue.is_pull_request() => {}
            _ => return Err(StorageError::NotFound { id }),
        }
        let payload = IssuePayload {
            state: Some("closed".into()),
            state_reason: Some("not_planned".into()),
            labels: Some(Vec::new()),
            ..IssuePayload::default()
        };
        self.client.update_issue(id, &payload).await?;
        debug!(number = id, "devlog issue closed as not planned");
        Ok(())
    }

    async fn search(&self, text: &str) -> Result<Vec<DevlogEntry>> {
        let issues = self.client.search_issues(&format!("{} in:title,body", text.trim())).await?;
        Ok(issues
            .iter()
            .filter(|issue| mapper::is_devlog_issue(issue, &self.config))
            .map(|issue| self.to_entry(issue))
            .collect())
    }
}

#[async_trait]
impl ChangeSource for GitHubInner {
    async fn changed_since(&self, since: DateTime<Utc>) -> Result<Vec<DevlogEntry>> {
        let issues = self.client.list_issues(Some(since), true).await?;
        Ok(issues
            .iter()
            .filter(|issue| mapper::is_devlog_issue(issue, &self.config))
            .map(|issue| self.to_entry(issue))
            .filter(|entry| !entry.archived)
            .collect())
    }

    async fn snapshot(&self) -> Result<HashMap<DevlogId, DateTime<Utc>>> {
        Ok(self
            .load_entries(true)
            .await?
            .into_iter()
            .filter(|entry| !entry.archived)
            .filter_map(|entry| entry.id.map(|id| (id, entry.updated_at)))
            .collect())
    }
}

#[async_trait]
impl StorageProvider for GitHubStorage {
    async fn initialize(&self) -> Result<()> {
        self.inner.ensure_initialized().await
    }

    async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        self.inner.ensure_initialized().await?;
        self.inner.get(id).await
    }

    async fn save(&self, entry: DevlogEntry) -> Result<DevlogEntry> {
        if entry.title.trim().is_empty() {
            return Err(StorageError::Validation("title must not be empty".into()));
        }
        self.inner.ensure_initialized().await?;
        self.inner.save(entry).await
    }

    async fn delete(&self, id: DevlogId) -> Result<()> {
        self.inner.ensure_initialized().await?;
        self.inner.delete(id).await
    }

    async fn list(&self, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        self.inner.ensure_initialized().await?;
        query::apply(self.inner.load_entries(false).await?, filter)
    }

    async fn search(&self, text: &str, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        self.inner.ensure_initialized().await?;
        if text.trim().is_empty() {
            return self.list(filter).await;
        }
        // GitHub already matched the text; only the structured filters remain.
        let mut filter = filter.clone();
        filter.search = None;
        query::apply(self.inner.search(text).await?, &filter)
    }

    async fn get_stats(&self, filter: &DevlogFilter) -> Result<DevlogStats> {
        self.inner.ensure_initialized().await?;
        Ok(query::compute_stats(&self.inner.load_entries(false).await?, filter))
    }

    async fn get_time_series_stats(&self, request: &TimeSeriesRequest) -> Result<TimeSeriesStats> {
        let range = request.resolve(Utc::now().date_naive())?;
        self.inner.ensure_initialized().await?;
        Ok(query::compute_time_series(&self.inner.load_entries(false).await?, range))
    }

    /// Placeholder only; the issue number replaces it on `save`.
    async fn get_next_id(&self) -> Result<DevlogId> {
        Ok(Utc::now().timestamp_millis())
    }

    async fn subscribe(&self, callback: EventCallback) -> Result<Subscription> {
        self.inner.ensure_initialized().await?;
        let source: Arc<dyn ChangeSource> = self.inner.clone();
        self.feed.subscribe(source, callback).await
    }

    async fn cleanup(&self) -> Result<()> {
        self.feed.stop();
        self.inner.client.clear_cache();
        Ok(())
    }

    fn is_remote_storage(&self) -> bool {
        true
    }

    fn is_git_based(&self) -> bool {
        true
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Github
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> GitHubStorage {
        let mut config = GitHubStorageConfig::new("octo", "devlog", "ghp_test");
        config.api_url = "http://127.0.0.1:9".into();
        GitHubStorage::new(config, Duration::from_secs(30)).unwrap()
    }

    #[tokio::test]
    async fn next_id_is_a_timestamp_placeholder() {
        let storage = storage();
        let before = Utc::now().timestamp_millis();
        let id = storage.get_next_id().await.unwrap();
        assert!(id >= before);
    }

    #[test]
    fn capability_flags() {
        let storage = storage();
        assert!(storage.is_remote_storage());
        assert!(storage.is_git_based());
        assert_eq!(storage.storage_type(), StorageType::Github);
    }

    #[tokio::test]
    async fn empty_title_is_rejected_before_any_request() {
        let storage = storage();
        let entry = DevlogEntry::new("   ", crate::models::DevlogType::Task);
        let err = storage.save(entry).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }
}
