//! Entry-level operations over a [`StorageProvider`].
//!
//! The provider contract is a full-entity upsert; the manager adds the
//! read-modify-write operations callers actually want (partial update,
//! append a note, complete, archive) and unique key generation.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Result, StorageError};
use crate::models::{
    DevlogEntry, DevlogFilter, DevlogId, DevlogNote, DevlogPriority, DevlogStats, DevlogStatus,
    DevlogType, NoteCategory, PaginatedResult, TimeSeriesRequest, TimeSeriesStats, now_millis, slugify,
};
use crate::storage::StorageProvider;

const MAX_KEY_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDevlogRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: DevlogType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<DevlogPriority>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub business_context: Option<String>,
    #[serde(default)]
    pub technical_context: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl CreateDevlogRequest {
    pub fn new(title: impl Into<String>, entry_type: DevlogType) -> Self {
        Self {
            title: title.into(),
            entry_type,
            description: String::new(),
            priority: None,
            key: None,
            assignee: None,
            business_context: None,
            technical_context: None,
            acceptance_criteria: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: DevlogPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update; `None` leaves a field unchanged. An empty assignee
/// clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateDevlogRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: Option<DevlogType>,
    pub status: Option<DevlogStatus>,
    pub priority: Option<DevlogPriority>,
    pub assignee: Option<String>,
    pub business_context: Option<String>,
    pub technical_context: Option<String>,
    pub acceptance_criteria: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
}

impl UpdateDevlogRequest {
    pub fn status(status: DevlogStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn apply(self, entry: &mut DevlogEntry) {
        if let Some(title) = self.title {
            entry.title = title;
        }
        if let Some(description) = self.description {
            entry.description = description;
        }
        if let Some(entry_type) = self.entry_type {
            entry.entry_type = entry_type;
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(priority) = self.priority {
            entry.priority = priority;
        }
        if let Some(assignee) = self.assignee {
            entry.assignee = Some(assignee).filter(|a| !a.trim().is_empty());
        }
        if let Some(business) = self.business_context {
            entry.context.business_context = business;
        }
        if let Some(technical) = self.technical_context {
            entry.context.technical_context = technical;
        }
        if let Some(criteria) = self.acceptance_criteria {
            entry.context.acceptance_criteria = criteria;
        }
        if let Some(files) = self.files {
            entry.files = files;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiContextUpdate {
    pub summary: Option<String>,
    pub insights: Vec<String>,
    pub questions: Option<Vec<String>>,
    pub patterns: Vec<String>,
    pub next_steps: Option<Vec<String>>,
}

pub struct DevlogManager {
    provider: Arc<dyn StorageProvider>,
}

impl DevlogManager {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    async fn load(&self, id: DevlogId) -> Result<DevlogEntry> {
        self.provider.get(id).await?.ok_or(StorageError::NotFound { id })
    }

    /// Saves a new entry. The key defaults to the title slug; a conflicting
    /// key gets a numeric suffix.
    pub async fn create_devlog(&self, request: CreateDevlogRequest) -> Result<DevlogEntry> {
        if request.title.trim().is_empty() {
            return Err(StorageError::Validation("title must not be empty".into()));
        }
        let mut entry = DevlogEntry::new(request.title.trim(), request.entry_type);
        entry.description = request.description;
        if let Some(priority) = request.priority {
            entry.priority = priority;
        }
        entry.assignee = request.assignee.filter(|a| !a.trim().is_empty());
        entry.context.business_context = request.business_context.unwrap_or_default();
        entry.context.technical_context = request.technical_context.unwrap_or_default();
        entry.context.acceptance_criteria = request.acceptance_criteria;
        entry.files = request.files;

        let base = match request.key.as_deref().map(slugify) {
            Some(key) if !key.is_empty() => key,
            _ => slugify(&entry.title),
        };
        let base = if base.is_empty() { "devlog".to_string() } else { base };

        let mut attempt = 1;
        loop {
            entry.key = if attempt == 1 { base.clone() } else { format!("{}-{}", base, attempt) };
            match self.provider.save(entry.clone()).await {
                Ok(saved) => {
                    info!(id = ?saved.id, key = %saved.key, "devlog created");
                    return Ok(saved);
                }
                Err(StorageError::Validation(reason)) if attempt < MAX_KEY_ATTEMPTS => {
                    debug!(key = %entry.key, reason = %reason, "key taken, retrying with suffix");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn update_devlog(&self, id: DevlogId, update: UpdateDevlogRequest) -> Result<DevlogEntry> {
        let mut entry = self.load(id).await?;
        update.apply(&mut entry);
        entry.touch();
        self.provider.save(entry).await
    }

    pub async fn add_note(&self, id: DevlogId, note: DevlogNote) -> Result<DevlogEntry> {
        if note.content.trim().is_empty() {
            return Err(StorageError::Validation("note content must not be empty".into()));
        }
        let mut entry = self.load(id).await?;
        entry.notes.push(note);
        entry.touch();
        self.provider.save(entry).await
    }

    /// Merges agent context. Insights and patterns accumulate; summary,
    /// questions and next steps are replaced when given.
    pub async fn update_ai_context(&self, id: DevlogId, update: AiContextUpdate) -> Result<DevlogEntry> {
        let mut entry = self.load(id).await?;
        let ai = &mut entry.ai_context;
        if let Some(summary) = update.summary {
            ai.current_summary = summary;
        }
        for insight in update.insights {
            if !ai.key_insights.contains(&insight) {
                ai.key_insights.push(insight);
            }
        }
        for pattern in update.patterns {
            if !ai.related_patterns.contains(&pattern) {
                ai.related_patterns.push(pattern);
            }
        }
        if let Some(questions) = update.questions {
            ai.open_questions = questions;
        }
        if let Some(next_steps) = update.next_steps {
            ai.suggested_next_steps = next_steps;
        }
        ai.last_ai_update = Some(now_millis());
        ai.context_version += 1;
        entry.touch();
        self.provider.save(entry).await
    }

    /// Marks the entry done, optionally recording a closing summary note.
    pub async fn complete_devlog(&self, id: DevlogId, summary: Option<&str>) -> Result<DevlogEntry> {
        let mut entry = self.load(id).await?;
        entry.status = DevlogStatus::Done;
        if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
            entry
                .notes
                .push(DevlogNote::new(NoteCategory::Progress, format!("Completed: {}", summary)));
        }
        entry.touch();
        self.provider.save(entry).await
    }

    pub async fn archive_devlog(&self, id: DevlogId) -> Result<()> {
        self.provider.delete(id).await?;
        info!(id, "devlog archived");
        Ok(())
    }

    pub async fn unarchive_devlog(&self, id: DevlogId) -> Result<DevlogEntry> {
        let mut entry = self.load(id).await?;
        entry.archived = false;
        entry.touch();
        self.provider.save(entry).await
    }

    pub async fn get_devlog(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
        self.provider.get(id).await
    }

    pub async fn list_devlogs(&self, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        self.provider.list(filter).await
    }

    pub async fn search_devlogs(&self, query: &str, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
        self.provider.search(query, filter).await
    }

    pub async fn get_stats(&self, filter: &DevlogFilter) -> Result<DevlogStats> {
        self.provider.get_stats(filter).await
    }

    pub async fn get_time_series_stats(&self, request: &TimeSeriesRequest) -> Result<TimeSeriesStats> {
        self.provider.get_time_series_stats(request).await
    }
}
