//! Issue ↔ entry mapping: labels, state, title decoration.

use std::sync::LazyLock;

use regex::Regex;

use super::client::{GitHubComment, GitHubIssue, IssuePayload};
use super::metadata::{self, DevlogMetadata};
use crate::config::GitHubStorageConfig;
use crate::errors::Result;
use crate::models::{
    DevlogEntry, DevlogNote, DevlogPriority, DevlogStatus, DevlogType, truncate_millis,
};

pub const PRIORITY_PREFIX: &str = "priority:";
pub const STATUS_PREFIX: &str = "status:";
pub const TYPE_PREFIX: &str = "type:";

static LEADING_EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{2B00}-\x{2BFF}\x{FE0F}\x{200D}]\s*)+")
        .expect("valid regex")
});

pub fn status_emoji(status: DevlogStatus) -> Option<&'static str> {
    match status {
        DevlogStatus::Done => Some("✅"),
        DevlogStatus::Blocked => Some("🚫"),
        DevlogStatus::Cancelled => Some("❌"),
        _ => None,
    }
}

pub fn type_emoji(entry_type: DevlogType) -> &'static str {
    match entry_type {
        DevlogType::Feature => "✨",
        DevlogType::Bugfix => "🐛",
        DevlogType::Task => "📋",
        DevlogType::Refactor => "♻️",
        DevlogType::Docs => "📝",
    }
}

/// Title as shown on GitHub when emoji decoration is enabled.
pub fn decorate_title(entry: &DevlogEntry) -> String {
    let mut prefix = String::new();
    if entry.priority == DevlogPriority::Critical {
        prefix.push_str("🔥");
    }
    prefix.push_str(status_emoji(entry.status).unwrap_or_else(|| type_emoji(entry.entry_type)));
    format!("{} {}", prefix, entry.title)
}

pub fn strip_title_emoji(title: &str) -> String {
    LEADING_EMOJI.replace(title, "").trim().to_string()
}

/// Labels carried by an entry's issue.
pub fn labels_for(entry: &DevlogEntry, config: &GitHubStorageConfig) -> Vec<String> {
    let mut labels = vec![
        config.marker_label.clone(),
        format!("{}{}", PRIORITY_PREFIX, entry.priority.as_str()),
    ];
    if !config.mapping.use_native_type {
        labels.push(format!("{}{}", TYPE_PREFIX, entry.entry_type.as_str()));
    }
    if needs_status_label(entry.status, config) {
        labels.push(format!("{}{}", STATUS_PREFIX, entry.status.as_str()));
    }
    labels
}

/// Whether `status` cannot be expressed by `state` / `state_reason` alone.
pub fn needs_status_label(status: DevlogStatus, config: &GitHubStorageConfig) -> bool {
    !config.mapping.use_state_reason
        || !matches!(status, DevlogStatus::New | DevlogStatus::Done | DevlogStatus::Cancelled)
}

/// Every label the adapter may apply, for bootstrapping.
pub fn managed_labels(config: &GitHubStorageConfig) -> Vec<(String, &'static str)> {
    let mut labels = vec![(config.marker_label.clone(), "0e8a16")];
    labels.extend(
        DevlogPriority::ALL
            .iter()
            .map(|p| (format!("{}{}", PRIORITY_PREFIX, p.as_str()), "d93f0b")),
    );
    if !config.mapping.use_native_type {
        labels.extend(
            DevlogType::ALL
                .iter()
                .map(|t| (format!("{}{}", TYPE_PREFIX, t.as_str()), "1d76db")),
        );
    }
    labels.extend(
        DevlogStatus::ALL
            .iter()
            .filter(|s| needs_status_label(**s, config))
            .map(|s| (format!("{}{}", STATUS_PREFIX, s.as_str()), "fbca04")),
    );
    labels
}

pub fn native_type_name(entry_type: DevlogType) -> &'static str {
    match entry_type {
        DevlogType::Bugfix => "Bug",
        DevlogType::Feature => "Feature",
        _ => "Task",
    }
}

/// `(state, state_reason)` for a status.
pub fn state_for(status: DevlogStatus, config: &GitHubStorageConfig) -> (&'static str, Option<&'static str>) {
    match status {
        DevlogStatus::Done => ("closed", config.mapping.use_state_reason.then_some("completed")),
        DevlogStatus::Cancelled => ("closed", config.mapping.use_state_reason.then_some("not_planned")),
        _ => ("open", None),
    }
}

/// Full create/update body for an entry.
pub fn issue_payload(entry: &DevlogEntry, config: &GitHubStorageConfig) -> Result<IssuePayload> {
    let title = if config.enable_emoji_titles {
        decorate_title(entry)
    } else {
        entry.title.clone()
    };
    let (state, state_reason) = state_for(entry.status, config);
    Ok(IssuePayload {
        title: Some(title),
        body: Some(metadata::encode_body(&entry.description, &DevlogMetadata::from_entry(entry))?),
        labels: Some(labels_for(entry, config)),
        assignees: Some(entry.assignee.iter().cloned().collect()),
        state: Some(state.to_string()),
        state_reason: state_reason.map(str::to_string),
        issue_type: config
            .mapping
            .use_native_type
            .then(|| native_type_name(entry.entry_type).to_string()),
    })
}

fn label_value<'a>(issue: &'a GitHubIssue, prefix: &str) -> Option<&'a str> {
    issue
        .labels
        .iter()
        .find_map(|l| l.name.strip_prefix(prefix))
}

/// Managed issue: marker label, or (best effort) a metadata block in the body.
pub fn is_devlog_issue(issue: &GitHubIssue, config: &GitHubStorageConfig) -> bool {
    !issue.is_pull_request()
        && (issue.has_label(&config.marker_label)
            || issue.body.as_deref().is_some_and(metadata::has_metadata))
}

fn derive_status(issue: &GitHubIssue, meta: Option<&DevlogMetadata>) -> DevlogStatus {
    if let Some(status) = label_value(issue, STATUS_PREFIX).and_then(|v| v.parse().ok()) {
        return status;
    }
    if let Some(status) = meta.and_then(|m| m.status)
        && status.is_closed() == issue.is_closed()
    {
        return status;
    }
    match (issue.is_closed(), issue.state_reason.as_deref()) {
        (true, Some("not_planned")) => DevlogStatus::Cancelled,
        (true, _) => DevlogStatus::Done,
        (false, _) => DevlogStatus::New,
    }
}

fn derive_type(issue: &GitHubIssue, meta: Option<&DevlogMetadata>) -> DevlogType {
    if let Some(t) = label_value(issue, TYPE_PREFIX).and_then(|v| v.parse().ok()) {
        return t;
    }
    if let Some(t) = meta.and_then(|m| m.entry_type) {
        return t;
    }
    match issue.issue_type.as_ref().map(|t| t.name.to_ascii_lowercase()) {
        Some(name) if name == "bug" => DevlogType::Bugfix,
        Some(name) if name == "feature" => DevlogType::Feature,
        _ => DevlogType::Task,
    }
}

/// Entry for an issue. Notes come from `comments`; pass an empty slice
/// when comments were not fetched.
pub fn issue_to_entry(issue: &GitHubIssue, comments: &[GitHubComment], config: &GitHubStorageConfig) -> DevlogEntry {
    let (description, meta) = metadata::decode_body(issue.body.as_deref().unwrap_or_default());
    let meta = meta.as_ref();

    let status = derive_status(issue, meta);
    let priority = label_value(issue, PRIORITY_PREFIX)
        .and_then(|v| v.parse().ok())
        .or_else(|| meta.and_then(|m| m.priority))
        .unwrap_or(DevlogPriority::Medium);
    let title = if config.enable_emoji_titles {
        strip_title_emoji(&issue.title)
    } else {
        issue.title.clone()
    };

    let closed_at = if status.is_closed() {
        Some(truncate_millis(issue.closed_at.unwrap_or(issue.updated_at)))
    } else {
        None
    };

    DevlogEntry {
        id: Some(issue.number),
        key: meta
            .and_then(|m| m.key.clone())
            .unwrap_or_else(|| format!("gh-{}", issue.number)),
        title,
        entry_type: derive_type(issue, meta),
        description,
        status,
        priority,
        created_at: truncate_millis(issue.created_at),
        updated_at: truncate_millis(issue.updated_at),
        closed_at,
        assignee: issue.assignee.as_ref().map(|u| u.login.clone()),
        archived: issue.is_closed() && !issue.has_label(&config.marker_label),
        notes: comments.iter().filter_map(comment_to_note).collect(),
        files: meta.map(|m| m.files.clone()).unwrap_or_default(),
        related_devlogs: meta.map(|m| m.related_devlogs.clone()).unwrap_or_default(),
        context: meta.map(|m| m.context.clone()).unwrap_or_default(),
        ai_context: meta.map(|m| m.ai_context.clone()).unwrap_or_default(),
        external_references: meta.map(|m| m.external_references.clone()).unwrap_or_default(),
    }
}

/// Note backed by a comment, keyed by the comment id.
pub fn comment_to_note(comment: &GitHubComment) -> Option<DevlogNote> {
    let parts = metadata::decode_note(comment.body.as_deref()?)?;
    Some(DevlogNote {
        id: comment.id.to_string(),
        timestamp: truncate_millis(comment.created_at),
        category: parts.category,
        content: parts.content,
        files: parts.files,
        code_changes: parts.code_changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::github::client::GitHubLabel;
    use chrono::{TimeZone, Utc};

    fn config() -> GitHubStorageConfig {
        GitHubStorageConfig::new("octo", "devlog", "ghp_test")
    }

    fn issue(state: &str, labels: &[&str], body: Option<String>) -> GitHubIssue {
        GitHubIssue {
            number: 12,
            title: "Fix login".into(),
            body,
            state: state.into(),
            state_reason: None,
            labels: labels
                .iter()
                .map(|l| GitHubLabel { name: l.to_string() })
                .collect(),
            assignee: None,
            issue_type: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
            closed_at: None,
            html_url: String::new(),
            pull_request: None,
        }
    }

    #[test]
    fn emoji_titles_round_trip() {
        let mut entry = DevlogEntry::new("Ship search", DevlogType::Feature);
        entry.priority = DevlogPriority::Critical;
        let decorated = decorate_title(&entry);
        assert_eq!(decorated, "🔥✨ Ship search");
        assert_eq!(strip_title_emoji(&decorated), "Ship search");

        entry.status = DevlogStatus::Done;
        entry.priority = DevlogPriority::Low;
        assert_eq!(decorate_title(&entry), "✅ Ship search");
        assert_eq!(strip_title_emoji("♻️ Clean up"), "Clean up");
        assert_eq!(strip_title_emoji("No emoji"), "No emoji");
    }

    #[test]
    fn labels_only_carry_status_when_needed() {
        let config = config();
        let mut entry = DevlogEntry::new("x", DevlogType::Bugfix);
        assert_eq!(labels_for(&entry, &config), vec!["devlog", "priority:medium", "type:bugfix"]);
        entry.status = DevlogStatus::InProgress;
        assert!(labels_for(&entry, &config).contains(&"status:in-progress".to_string()));
    }

    #[test]
    fn state_mapping() {
        let config = config();
        assert_eq!(state_for(DevlogStatus::Done, &config), ("closed", Some("completed")));
        assert_eq!(state_for(DevlogStatus::Cancelled, &config), ("closed", Some("not_planned")));
        assert_eq!(state_for(DevlogStatus::Testing, &config), ("open", None));
    }

    #[test]
    fn status_prefers_labels_then_consistent_metadata_then_state() {
        let config = config();
        let labelled = issue("open", &["devlog", "status:blocked"], None);
        assert_eq!(issue_to_entry(&labelled, &[], &config).status, DevlogStatus::Blocked);

        // Metadata says in-progress but the issue was closed on GitHub.
        let meta = DevlogMetadata {
            status: Some(DevlogStatus::InProgress),
            ..DevlogMetadata::default()
        };
        let body = metadata::encode_body("", &meta).unwrap();
        let mut closed = issue("closed", &["devlog"], Some(body));
        closed.state_reason = Some("not_planned".into());
        assert_eq!(issue_to_entry(&closed, &[], &config).status, DevlogStatus::Cancelled);

        let open = issue("open", &["devlog"], None);
        assert_eq!(issue_to_entry(&open, &[], &config).status, DevlogStatus::New);
    }

    #[test]
    fn archived_means_closed_without_marker() {
        let config = config();
        let stripped = issue("closed", &[], Some(metadata::encode_body("d", &DevlogMetadata::default()).unwrap()));
        assert!(is_devlog_issue(&stripped, &config));
        let entry = issue_to_entry(&stripped, &[], &config);
        assert!(entry.archived);
        assert!(entry.closed_at.is_some());

        let foreign = issue("open", &["bug"], Some("plain report".into()));
        assert!(!is_devlog_issue(&foreign, &config));
    }

    #[test]
    fn entry_payload_round_trips_through_issue() {
        let config = config();
        let mut entry = DevlogEntry::new("Fix login", DevlogType::Bugfix);
        entry.description = "Cookie expires".into();
        entry.status = DevlogStatus::InReview;
        entry.priority = DevlogPriority::High;
        entry.files = vec!["src/auth.rs".into()];
        let payload = issue_payload(&entry, &config).unwrap();

        let mut remote = issue("open", &[], payload.body.clone());
        remote.labels = payload
            .labels
            .clone()
            .unwrap()
            .into_iter()
            .map(|name| GitHubLabel { name })
            .collect();
        let back = issue_to_entry(&remote, &[], &config);
        assert_eq!(back.key, entry.key);
        assert_eq!(back.status, DevlogStatus::InReview);
        assert_eq!(back.priority, DevlogPriority::High);
        assert_eq!(back.entry_type, DevlogType::Bugfix);
        assert_eq!(back.description, "Cookie expires");
        assert_eq!(back.files, entry.files);
        assert!(!back.archived);
    }
}
