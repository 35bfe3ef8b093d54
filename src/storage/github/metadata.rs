//! Structured data hidden in issue bodies and comments.
//!
//! Issue bodies carry the human-readable description followed by
//! `<!-- DEVLOG_METADATA: <base64 JSON> -->`. Note comments carry the note
//! content followed by small `DEVLOG_NOTE_*` markers.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::Result;
use crate::models::{
    AiContext, DevlogContext, DevlogEntry, DevlogNote, DevlogPriority, DevlogStatus, DevlogType,
    ExternalReference, NoteCategory,
};

static METADATA_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*DEVLOG_METADATA:\s*([A-Za-z0-9+/=\s]*?)\s*-->").expect("valid regex")
});

static NOTE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*DEVLOG_NOTE_(CATEGORY|FILES|CODE_CHANGES):\s*(.*?)\s*-->").expect("valid regex")
});

/// Entry fields GitHub has no native slot for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevlogMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<DevlogType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DevlogStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<DevlogPriority>,
    pub context: DevlogContext,
    pub ai_context: AiContext,
    pub files: Vec<String>,
    pub related_devlogs: Vec<String>,
    pub external_references: Vec<ExternalReference>,
}

impl DevlogMetadata {
    pub fn from_entry(entry: &DevlogEntry) -> Self {
        Self {
            key: Some(entry.key.clone()),
            entry_type: Some(entry.entry_type),
            status: Some(entry.status),
            priority: Some(entry.priority),
            context: entry.context.clone(),
            ai_context: entry.ai_context.clone(),
            files: entry.files.clone(),
            related_devlogs: entry.related_devlogs.clone(),
            external_references: entry.external_references.clone(),
        }
    }
}

/// Description followed by one metadata block.
pub fn encode_body(description: &str, metadata: &DevlogMetadata) -> Result<String> {
    let encoded = BASE64.encode(serde_json::to_vec(metadata)?);
    let description = description.trim_end();
    if description.is_empty() {
        Ok(format!("<!-- DEVLOG_METADATA: {} -->", encoded))
    } else {
        Ok(format!("{}\n\n<!-- DEVLOG_METADATA: {} -->", description, encoded))
    }
}

pub fn has_metadata(body: &str) -> bool {
    METADATA_BLOCK.is_match(body)
}

fn decode_block(raw: &str) -> Option<Map<String, Value>> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = match BASE64.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "skipping metadata block with invalid base64");
            return None;
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!("skipping metadata block that is not a JSON object");
            None
        }
        Err(err) => {
            warn!(error = %err, "skipping metadata block with invalid JSON");
            None
        }
    }
}

/// Splits a body into description and metadata.
///
/// Every block is removed from the description. Blocks merge left to
/// right, later keys winning; undecodable blocks are skipped.
pub fn decode_body(body: &str) -> (String, Option<DevlogMetadata>) {
    let mut merged: Option<Map<String, Value>> = None;
    for caps in METADATA_BLOCK.captures_iter(body) {
        if let Some(block) = caps.get(1).and_then(|m| decode_block(m.as_str())) {
            merged.get_or_insert_with(Map::new).extend(block);
        }
    }
    let description = METADATA_BLOCK.replace_all(body, "").trim().to_string();

    let metadata = merged.and_then(|map| match serde_json::from_value(Value::Object(map)) {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            warn!(error = %err, "metadata does not match the devlog schema");
            None
        }
    });
    (description, metadata)
}

/// Comment body for a note.
pub fn encode_note(note: &DevlogNote) -> Result<String> {
    let mut body = format!(
        "{}\n\n<!-- DEVLOG_NOTE_CATEGORY: {} -->",
        note.content.trim_end(),
        note.category.as_str()
    );
    if !note.files.is_empty() {
        let files = BASE64.encode(serde_json::to_vec(&note.files)?);
        body.push_str(&format!("\n<!-- DEVLOG_NOTE_FILES: {} -->", files));
    }
    if let Some(changes) = &note.code_changes {
        body.push_str(&format!(
            "\n<!-- DEVLOG_NOTE_CODE_CHANGES: {} -->",
            BASE64.encode(changes.as_bytes())
        ));
    }
    Ok(body)
}

/// Note fields parsed from a comment body; `None` for comments this
/// adapter did not write.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteParts {
    pub category: NoteCategory,
    pub content: String,
    pub files: Vec<String>,
    pub code_changes: Option<String>,
}

pub fn decode_note(body: &str) -> Option<NoteParts> {
    let mut category = None;
    let mut files = Vec::new();
    let mut code_changes = None;

    for caps in NOTE_MARKER.captures_iter(body) {
        let (Some(kind), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str();
        match kind.as_str() {
            "CATEGORY" => {
                category = Some(value.parse().unwrap_or_else(|err: String| {
                    warn!(error = %err, "unknown note category, using progress");
                    NoteCategory::Progress
                }));
            }
            "FILES" => match BASE64.decode(value).ok().and_then(|b| serde_json::from_slice(&b).ok()) {
                Some(list) => files = list,
                None => warn!("undecodable note files marker"),
            },
            _ => match BASE64.decode(value).ok().and_then(|b| String::from_utf8(b).ok()) {
                Some(text) => code_changes = Some(text),
                None => warn!("undecodable note code-changes marker"),
            },
        }
    }

    Some(NoteParts {
        category: category?,
        content: NOTE_MARKER.replace_all(body, "").trim().to_string(),
        files,
        code_changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(json: &str) -> String {
        format!("<!-- DEVLOG_METADATA: {} -->", BASE64.encode(json))
    }

    #[test]
    fn body_round_trip() {
        let mut entry = DevlogEntry::new("Fix login", DevlogType::Bugfix);
        entry.description = "Users get logged out.".into();
        entry.files = vec!["src/auth.rs".into()];
        entry.ai_context.current_summary = "session cookie expiry".into();
        let metadata = DevlogMetadata::from_entry(&entry);

        let body = encode_body(&entry.description, &metadata).unwrap();
        assert!(body.starts_with("Users get logged out.\n\n<!-- DEVLOG_METADATA: "));
        let (description, decoded) = decode_body(&body);
        assert_eq!(description, "Users get logged out.");
        assert_eq!(decoded, Some(metadata));
    }

    #[test]
    fn later_blocks_override_earlier_ones() {
        let body = format!(
            "text\n{}\n{}",
            block(r#"{"key":"a","status":"new","files":["x"]}"#),
            block(r#"{"status":"blocked"}"#)
        );
        let (description, metadata) = decode_body(&body);
        let metadata = metadata.unwrap();
        assert_eq!(description, "text");
        assert_eq!(metadata.key.as_deref(), Some("a"));
        assert_eq!(metadata.status, Some(DevlogStatus::Blocked));
        assert_eq!(metadata.files, vec!["x".to_string()]);
    }

    #[test]
    fn invalid_blocks_are_skipped() {
        let body = format!(
            "<!-- DEVLOG_METADATA: !!!notbase64 -->\n{}\n{}",
            block("[1,2]"),
            block(r#"{"priority":"high"}"#)
        );
        let (_, metadata) = decode_body(&body);
        assert_eq!(metadata.unwrap().priority, Some(DevlogPriority::High));
    }

    #[test]
    fn plain_bodies_have_no_metadata() {
        let (description, metadata) = decode_body("just a bug report");
        assert_eq!(description, "just a bug report");
        assert!(metadata.is_none());
        assert!(!has_metadata("just a bug report"));
    }

    #[test]
    fn note_markers_round_trip() {
        let mut note = DevlogNote::new(NoteCategory::Solution, "Bumped cookie TTL");
        note.files = vec!["src/session.rs".into()];
        note.code_changes = Some("-ttl: 5\n+ttl: 60 -->".into());
        let body = encode_note(&note).unwrap();

        let parts = decode_note(&body).unwrap();
        assert_eq!(parts.category, NoteCategory::Solution);
        assert_eq!(parts.content, "Bumped cookie TTL");
        assert_eq!(parts.files, note.files);
        assert_eq!(parts.code_changes, note.code_changes);
    }

    #[test]
    fn foreign_comments_are_not_notes() {
        assert!(decode_note("LGTM, ship it").is_none());
    }
}
