use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StorageError};

pub type DevlogId = i64;

pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 1000;
pub const DEFAULT_TIME_SERIES_DAYS: u32 = 30;
const MAX_TIME_SERIES_DAYS: u32 = 3660;

// ── Classification enums ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevlogType {
    Feature,
    Bugfix,
    Task,
    Refactor,
    Docs,
}

impl DevlogType {
    pub const ALL: [DevlogType; 5] = [
        Self::Feature,
        Self::Bugfix,
        Self::Task,
        Self::Refactor,
        Self::Docs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Task => "task",
            Self::Refactor => "refactor",
            Self::Docs => "docs",
        }
    }
}

impl FromStr for DevlogType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "feature" => Ok(Self::Feature),
            "bugfix" => Ok(Self::Bugfix),
            "task" => Ok(Self::Task),
            "refactor" => Ok(Self::Refactor),
            "docs" => Ok(Self::Docs),
            _ => Err(format!("Invalid devlog type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevlogStatus {
    New,
    InProgress,
    Blocked,
    InReview,
    Testing,
    Done,
    Cancelled,
}

impl DevlogStatus {
    pub const ALL: [DevlogStatus; 7] = [
        Self::New,
        Self::InProgress,
        Self::Blocked,
        Self::InReview,
        Self::Testing,
        Self::Done,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in-progress",
            Self::Blocked => "blocked",
            Self::InReview => "in-review",
            Self::Testing => "testing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled entries are closed and carry `closed_at`.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl FromStr for DevlogStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in-progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "in-review" => Ok(Self::InReview),
            "testing" => Ok(Self::Testing),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid devlog status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevlogPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl DevlogPriority {
    pub const ALL: [DevlogPriority; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Ordinal used when sorting by priority.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl FromStr for DevlogPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid devlog priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteCategory {
    Progress,
    Issue,
    Solution,
    Idea,
    Reminder,
    Feedback,
}

impl NoteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Issue => "issue",
            Self::Solution => "solution",
            Self::Idea => "idea",
            Self::Reminder => "reminder",
            Self::Feedback => "feedback",
        }
    }
}

impl FromStr for NoteCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "progress" => Ok(Self::Progress),
            "issue" => Ok(Self::Issue),
            "solution" => Ok(Self::Solution),
            "idea" => Ok(Self::Idea),
            "reminder" => Ok(Self::Reminder),
            "feedback" => Ok(Self::Feedback),
            _ => Err(format!("Invalid note category: {}", s)),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(DevlogType, DevlogStatus, DevlogPriority, NoteCategory);

// ── Entry aggregate ─────────────────────────────────────────────────

/// A timestamped observation attached to an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevlogNote {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: NoteCategory,
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_changes: Option<String>,
}

impl DevlogNote {
    pub fn new(category: NoteCategory, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            category,
            content: content.into(),
            files: Vec::new(),
            code_changes: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevlogContext {
    pub business_context: String,
    pub technical_context: String,
    pub dependencies: Vec<String>,
    pub decisions: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub risks: Vec<String>,
}

/// Agent-maintained working memory for an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiContext {
    pub current_summary: String,
    pub key_insights: Vec<String>,
    pub open_questions: Vec<String>,
    pub related_patterns: Vec<String>,
    pub suggested_next_steps: Vec<String>,
    pub last_ai_update: Option<DateTime<Utc>>,
    pub context_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
    pub system: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// The devlog aggregate root.
///
/// `id` is `None` until the first save; the backend assigns it and it never
/// changes afterwards. `archived` is the soft-delete flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevlogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DevlogId>,
    pub key: String,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: DevlogType,
    #[serde(default)]
    pub description: String,
    pub status: DevlogStatus,
    pub priority: DevlogPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub notes: Vec<DevlogNote>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub related_devlogs: Vec<String>,
    #[serde(default)]
    pub context: DevlogContext,
    #[serde(default)]
    pub ai_context: AiContext,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
}

impl DevlogEntry {
    pub fn new(title: impl Into<String>, entry_type: DevlogType) -> Self {
        let title = title.into();
        let now = now_millis();
        Self {
            id: None,
            key: slugify(&title),
            title,
            entry_type,
            description: String::new(),
            status: DevlogStatus::New,
            priority: DevlogPriority::Medium,
            created_at: now,
            updated_at: now,
            closed_at: None,
            assignee: None,
            archived: false,
            notes: Vec::new(),
            files: Vec::new(),
            related_devlogs: Vec::new(),
            context: DevlogContext::default(),
            ai_context: AiContext::default(),
            external_references: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Brings lifecycle fields in line with the status before persisting.
    ///
    /// Closed statuses get a `closed_at` (the update time when none is set),
    /// open statuses lose it. Timestamps are truncated to milliseconds.
    pub fn normalize_lifecycle(&mut self) {
        self.created_at = truncate_millis(self.created_at);
        self.updated_at = truncate_millis(self.updated_at);
        if self.status.is_closed() {
            let closed = self.closed_at.unwrap_or(self.updated_at);
            self.closed_at = Some(truncate_millis(closed));
        } else {
            self.closed_at = None;
        }
        for note in &mut self.notes {
            note.timestamp = truncate_millis(note.timestamp);
        }
    }

    /// Prepares the entry for a write. `stored` is the persisted
    /// `updated_at` when the entry already exists.
    ///
    /// `updated_at` becomes the write time, strictly after `stored`, so
    /// the change feed sees every save. A newly closed entry is closed at
    /// the write time; a new entry keeps its own `updated_at` as close time.
    pub fn stamp_write(&mut self, stored: Option<DateTime<Utc>>) {
        let mut stamp = now_millis();
        if let Some(stored) = stored
            && stamp <= stored
        {
            stamp = truncate_millis(stored) + chrono::Duration::milliseconds(1);
        }
        if self.status.is_closed() && self.closed_at.is_none() {
            self.closed_at = Some(if stored.is_some() { stamp } else { self.updated_at });
        }
        self.updated_at = stamp;
        self.normalize_lifecycle();
    }

    /// Day the entry counts as closed for time-series purposes.
    pub fn closed_date(&self) -> Option<NaiveDate> {
        if !self.is_closed() {
            return None;
        }
        Some(self.closed_at.unwrap_or(self.updated_at).date_naive())
    }
}

pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Derives an entry key from a title: lowercase ASCII alphanumerics joined
/// by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(64).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "devlog".to_string()
    } else {
        slug
    }
}

// ── Filtering and pagination ────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    UpdatedAt,
    CreatedAt,
    Id,
    Title,
    Status,
    Priority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationOptions {
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl PaginationOptions {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort_by: SortField, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(StorageError::Validation("page must be >= 1".into()));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(StorageError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, self.limit
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Criteria shared by `list`, `search` and `get_stats`.
///
/// Multi-valued fields are OR-sets; distinct fields AND together. With
/// `archived` unset only non-archived entries match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevlogFilter {
    pub status: Vec<DevlogStatus>,
    #[serde(rename = "type")]
    pub entry_type: Vec<DevlogType>,
    pub priority: Vec<DevlogPriority>,
    pub assignee: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub archived: Option<bool>,
    /// Inclusive lower bound on `updated_at`.
    pub updated_since: Option<DateTime<Utc>>,
    pub pagination: Option<PaginationOptions>,
}

impl DevlogFilter {
    pub fn with_status(mut self, status: DevlogStatus) -> Self {
        self.status.push(status);
        self
    }

    pub fn with_type(mut self, entry_type: DevlogType) -> Self {
        self.entry_type.push(entry_type);
        self
    }

    pub fn with_priority(mut self, priority: DevlogPriority) -> Self {
        self.priority.push(priority);
        self
    }

    pub fn with_search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationOptions) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn archived_only(&self) -> bool {
        self.archived == Some(true)
    }

    /// Pagination to apply, validated.
    pub fn page(&self) -> Result<PaginationOptions> {
        let pagination = self.pagination.clone().unwrap_or_default();
        pagination.validate()?;
        Ok(pagination)
    }

    /// Search text, trimmed; `None` when blank.
    pub fn search_text(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PaginationMeta {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let limit_u64 = u64::from(limit.max(1));
        let total_pages = u32::try_from(total.div_ceil(limit_u64)).unwrap_or(u32::MAX);
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

// ── Aggregates ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevlogStats {
    pub total_entries: u64,
    pub open_entries: u64,
    pub closed_entries: u64,
    pub by_status: BTreeMap<DevlogStatus, u64>,
    pub by_type: BTreeMap<DevlogType, u64>,
    pub by_priority: BTreeMap<DevlogPriority, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_completion_time_hours: Option<f64>,
}

impl DevlogStats {
    /// Builds stats from per-dimension counts, filling missing buckets with
    /// zero. Totals derive from the status buckets.
    pub fn from_counts(
        by_status: impl IntoIterator<Item = (DevlogStatus, u64)>,
        by_type: impl IntoIterator<Item = (DevlogType, u64)>,
        by_priority: impl IntoIterator<Item = (DevlogPriority, u64)>,
        average_completion_time_hours: Option<f64>,
    ) -> Self {
        let mut status_map: BTreeMap<_, _> = DevlogStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, n) in by_status {
            *status_map.entry(status).or_insert(0) += n;
        }
        let mut type_map: BTreeMap<_, _> = DevlogType::ALL.iter().map(|t| (*t, 0)).collect();
        for (t, n) in by_type {
            *type_map.entry(t).or_insert(0) += n;
        }
        let mut priority_map: BTreeMap<_, _> =
            DevlogPriority::ALL.iter().map(|p| (*p, 0)).collect();
        for (p, n) in by_priority {
            *priority_map.entry(p).or_insert(0) += n;
        }

        let total_entries = status_map.values().sum();
        let closed_entries = status_map
            .iter()
            .filter(|(s, _)| s.is_closed())
            .map(|(_, n)| *n)
            .sum();

        Self {
            total_entries,
            open_entries: total_entries - closed_entries,
            closed_entries,
            by_status: status_map,
            by_type: type_map,
            by_priority: priority_map,
            average_completion_time_hours,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeSeriesRequest {
    pub days: Option<u32>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TimeSeriesRequest {
    pub fn last_days(days: u32) -> Self {
        Self {
            days: Some(days),
            ..Self::default()
        }
    }

    /// Resolves the inclusive UTC day range relative to `today`.
    pub fn resolve(&self, today: NaiveDate) -> Result<DateRange> {
        let days = self.days.unwrap_or(DEFAULT_TIME_SERIES_DAYS);
        if days == 0 || days > MAX_TIME_SERIES_DAYS {
            return Err(StorageError::Validation(format!(
                "days must be between 1 and {}, got {}",
                MAX_TIME_SERIES_DAYS, days
            )));
        }
        let to = self.to.unwrap_or(today);
        let from = match self.from {
            Some(from) => from,
            None => to - chrono::Duration::days(i64::from(days) - 1),
        };
        if from > to {
            return Err(StorageError::Validation(format!(
                "time series range is inverted: {} > {}",
                from, to
            )));
        }
        if (to - from).num_days() >= i64::from(MAX_TIME_SERIES_DAYS) {
            return Err(StorageError::Validation(
                "time series range is too large".into(),
            ));
        }
        Ok(DateRange { from, to })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.from.iter_days().take_while(move |d| *d <= self.to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesDataPoint {
    pub date: NaiveDate,
    pub total_created: u64,
    pub total_completed: u64,
    pub total_closed: u64,
    pub daily_created: u64,
    pub daily_completed: u64,
    pub open: u64,
    pub new: u64,
    pub in_progress: u64,
    pub blocked: u64,
    pub in_review: u64,
    pub testing: u64,
    pub done: u64,
    pub cancelled: u64,
}

impl TimeSeriesDataPoint {
    pub fn status_count_mut(&mut self, status: DevlogStatus) -> &mut u64 {
        match status {
            DevlogStatus::New => &mut self.new,
            DevlogStatus::InProgress => &mut self.in_progress,
            DevlogStatus::Blocked => &mut self.blocked,
            DevlogStatus::InReview => &mut self.in_review,
            DevlogStatus::Testing => &mut self.testing,
            DevlogStatus::Done => &mut self.done,
            DevlogStatus::Cancelled => &mut self.cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesStats {
    pub data_points: Vec<TimeSeriesDataPoint>,
    pub date_range: DateRange,
}

// ── Change events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevlogEventType {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DevlogEventData {
    Entry(Box<DevlogEntry>),
    Deleted { id: DevlogId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevlogEvent {
    #[serde(rename = "type")]
    pub event_type: DevlogEventType,
    pub timestamp: DateTime<Utc>,
    pub data: DevlogEventData,
}

impl DevlogEvent {
    pub fn created(entry: DevlogEntry) -> Self {
        Self::with_entry(DevlogEventType::Created, entry)
    }

    pub fn updated(entry: DevlogEntry) -> Self {
        Self::with_entry(DevlogEventType::Updated, entry)
    }

    pub fn deleted(id: DevlogId) -> Self {
        Self {
            event_type: DevlogEventType::Deleted,
            timestamp: now_millis(),
            data: DevlogEventData::Deleted { id },
        }
    }

    fn with_entry(event_type: DevlogEventType, entry: DevlogEntry) -> Self {
        Self {
            event_type,
            timestamp: now_millis(),
            data: DevlogEventData::Entry(Box::new(entry)),
        }
    }

    pub fn entry_id(&self) -> Option<DevlogId> {
        match &self.data {
            DevlogEventData::Entry(entry) => entry.id,
            DevlogEventData::Deleted { id } => Some(*id),
        }
    }
}
