//! GitHub Issues adapter against a mocked REST API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use devlog_storage::config::GitHubStorageConfig;
use devlog_storage::errors::StorageError;
use devlog_storage::feed::callback;
use devlog_storage::models::{
    DevlogEntry, DevlogEventType, DevlogFilter, DevlogNote, DevlogPriority, DevlogStatus,
    DevlogType, NoteCategory,
};
use devlog_storage::storage::github::metadata::{DevlogMetadata, encode_body, encode_note};
use devlog_storage::storage::{GitHubStorage, StorageProvider};

const REPO: &str = "/repos/octo/devlog";

fn config(server: &MockServer) -> GitHubStorageConfig {
    let mut config = GitHubStorageConfig::new("octo", "devlog", "ghp_test");
    config.api_url = server.uri();
    config.rate_limit.initial_backoff_ms = 10;
    config.rate_limit.max_backoff_ms = 100;
    config.request_timeout_ms = 5_000;
    config
}

fn storage(server: &MockServer) -> GitHubStorage {
    GitHubStorage::new(config(server), Duration::from_secs(30)).unwrap()
}

fn issue_json(number: i64, title: &str, labels: &[&str], body: &str, state: &str) -> Value {
    json!({
        "number": number,
        "title": title,
        "body": body,
        "state": state,
        "state_reason": if state == "closed" { json!("not_planned") } else { Value::Null },
        "labels": labels.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
        "assignee": null,
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-02T12:30:00Z",
        "closed_at": if state == "closed" { json!("2024-05-02T12:30:00Z") } else { Value::Null },
        "html_url": format!("https://github.com/octo/devlog/issues/{}", number),
    })
}

/// Repository lookup and label bootstrap succeed.
async fn server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(REPO))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "full_name": "octo/devlog" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/labels", REPO)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/labels", REPO)))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "name": "label" })))
        .mount(&server)
        .await;
    server
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_initialize_bootstraps_labels() {
        let server = server().await;
        let storage = storage(&server);
        storage.initialize().await.unwrap();
        storage.initialize().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let repo_lookups = requests
            .iter()
            .filter(|r| r.method.as_str() == "GET" && r.url.path() == REPO)
            .count();
        let created_labels = requests
            .iter()
            .filter(|r| r.method.as_str() == "POST" && r.url.path().ends_with("/labels"))
            .count();
        assert_eq!(repo_lookups, 1);
        assert!(created_labels > 0);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_connection_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(REPO))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })))
            .mount(&server)
            .await;

        let err = storage(&server).initialize().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_missing_repository_is_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(REPO))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
            .mount(&server)
            .await;

        let err = storage(&server).initialize().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_throttled_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(REPO))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(REPO))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/labels", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/labels", REPO)))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&server)
            .await;

        storage(&server).initialize().await.unwrap();
    }
}

mod entries {
    use super::*;

    #[tokio::test]
    async fn test_save_creates_labelled_issue() {
        let server = server().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues", REPO)))
            .and(body_partial_json(json!({
                "title": "Fix login bug",
                "labels": ["devlog", "priority:high", "type:bugfix"],
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(issue_json(
                    7,
                    "Fix login bug",
                    &["devlog", "priority:high", "type:bugfix"],
                    "",
                    "open",
                )),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/7/comments", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let mut entry = DevlogEntry::new("Fix login bug", DevlogType::Bugfix);
        entry.priority = DevlogPriority::High;
        let saved = storage(&server).save(entry).await.unwrap();
        assert_eq!(saved.id, Some(7));
    }

    #[tokio::test]
    async fn test_new_notes_become_comments() {
        let server = server().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues", REPO)))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue_json(8, "Notes", &["devlog"], "", "open")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/8/comments", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues/8/comments", REPO)))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 555,
                "body": "Reproduced on staging",
                "created_at": "2024-05-02T13:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut entry = DevlogEntry::new("Notes", DevlogType::Task);
        entry
            .notes
            .push(DevlogNote::new(NoteCategory::Issue, "Reproduced on staging"));
        let saved = storage(&server).save(entry).await.unwrap();
        assert_eq!(saved.notes.len(), 1);
        assert_eq!(saved.notes[0].id, "555");
    }

    #[tokio::test]
    async fn test_note_sync_updates_changed_and_deletes_orphaned_comments() {
        let server = server().await;
        let issue = issue_json(20, "Sync notes", &["devlog"], "", "open");
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/20", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue.clone()))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/issues/20", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue))
            .expect(1)
            .mount(&server)
            .await;

        let mut edited = DevlogNote::new(NoteCategory::Progress, "Halfway there");
        edited.id = "701".into();
        let mut kept = DevlogNote::new(NoteCategory::Idea, "Try a queue");
        kept.id = "702".into();
        let stale = DevlogNote {
            content: "Just started".into(),
            ..edited.clone()
        };
        let orphan = DevlogNote::new(NoteCategory::Issue, "No longer relevant");
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/20/comments", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 701, "body": encode_note(&stale).unwrap(), "created_at": "2024-05-02T13:00:00Z" },
                { "id": 702, "body": encode_note(&kept).unwrap(), "created_at": "2024-05-02T13:05:00Z" },
                { "id": 703, "body": encode_note(&orphan).unwrap(), "created_at": "2024-05-02T13:10:00Z" },
                { "id": 704, "body": "drive-by comment", "created_at": "2024-05-02T13:15:00Z" },
            ])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/issues/comments/701", REPO)))
            .and(body_string_contains("Halfway there"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 701,
                "body": encode_note(&edited).unwrap(),
                "created_at": "2024-05-02T13:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/issues/comments/702", REPO)))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/issues/comments/703", REPO)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/issues/comments/704", REPO)))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues/20/comments", REPO)))
            .and(body_string_contains("Ship it"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 705,
                "body": "Ship it",
                "created_at": "2024-05-02T14:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut entry = DevlogEntry::new("Sync notes", DevlogType::Task);
        entry.id = Some(20);
        entry.notes = vec![edited, kept, DevlogNote::new(NoteCategory::Solution, "Ship it")];
        let saved = storage(&server).save(entry).await.unwrap();
        let ids: Vec<_> = saved.notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["701", "702", "705"]);
    }

    #[tokio::test]
    async fn test_failed_note_does_not_stop_the_rest() {
        let server = server().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues", REPO)))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue_json(21, "Two notes", &["devlog"], "", "open")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/21/comments", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues/21/comments", REPO)))
            .and(body_string_contains("first note"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/issues/21/comments", REPO)))
            .and(body_string_contains("second note"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 777,
                "body": "second note",
                "created_at": "2024-05-02T13:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let first = DevlogNote::new(NoteCategory::Progress, "first note");
        let first_id = first.id.clone();
        let mut entry = DevlogEntry::new("Two notes", DevlogType::Task);
        entry.notes = vec![first, DevlogNote::new(NoteCategory::Progress, "second note")];

        let saved = storage(&server).save(entry).await.unwrap();
        assert_eq!(saved.id, Some(21));
        assert_eq!(saved.notes[0].id, first_id);
        assert_eq!(saved.notes[1].id, "777");
    }

    #[tokio::test]
    async fn test_get_decodes_metadata_and_notes() {
        let server = server().await;
        let mut source = DevlogEntry::new("Cache tokens", DevlogType::Feature);
        source.key = "cache-tokens".into();
        source.status = DevlogStatus::InProgress;
        source.files = vec!["src/token.rs".into()];
        let body = encode_body("Avoid refetching tokens", &DevlogMetadata::from_entry(&source)).unwrap();
        let note = encode_note(&DevlogNote::new(NoteCategory::Idea, "Use a TTL")).unwrap();

        Mock::given(method("GET"))
            .and(path(format!("{}/issues/12", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(
                12,
                "Cache tokens",
                &["devlog", "priority:low", "type:feature", "status:in-progress"],
                &body,
                "open",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/12/comments", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 901, "body": note, "created_at": "2024-05-02T13:00:00Z" },
                { "id": 902, "body": "drive-by comment", "created_at": "2024-05-02T14:00:00Z" },
            ])))
            .mount(&server)
            .await;

        let entry = storage(&server).get(12).await.unwrap().unwrap();
        assert_eq!(entry.key, "cache-tokens");
        assert_eq!(entry.description, "Avoid refetching tokens");
        assert_eq!(entry.status, DevlogStatus::InProgress);
        assert_eq!(entry.priority, DevlogPriority::Low);
        assert_eq!(entry.entry_type, DevlogType::Feature);
        assert_eq!(entry.files, vec!["src/token.rs".to_string()]);
        assert_eq!(entry.notes.len(), 1);
        assert_eq!(entry.notes[0].id, "901");
        assert_eq!(entry.notes[0].category, NoteCategory::Idea);
        assert!(!entry.archived);
    }

    #[tokio::test]
    async fn test_get_missing_issue_is_none() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/404", REPO)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
            .mount(&server)
            .await;

        assert!(storage(&server).get(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_closes_as_not_planned() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/3", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(3, "Old", &["devlog"], "", "open")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/issues/3", REPO)))
            .and(body_partial_json(json!({
                "state": "closed",
                "state_reason": "not_planned",
                "labels": [],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(3, "Old", &[], "", "closed")))
            .expect(1)
            .mount(&server)
            .await;

        storage(&server).delete(3).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown_issue_is_not_found() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues/99", REPO)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
            .mount(&server)
            .await;

        let err = storage(&server).delete(99).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { id: 99 }));
    }
}

mod queries {
    use super::*;

    async fn with_issues(server: &MockServer) {
        let mut pr = issue_json(2, "A pull request", &["devlog"], "", "open");
        pr["pull_request"] = json!({ "url": "https://api.github.com/pulls/2" });
        Mock::given(method("GET"))
            .and(path(format!("{}/issues", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                issue_json(1, "Tracked", &["devlog", "priority:critical", "type:task"], "", "open"),
                pr,
                issue_json(3, "Someone else's bug", &["bug"], "plain report", "open"),
                issue_json(4, "Removed", &[], "", "closed"),
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_list_skips_foreign_issues_and_pull_requests() {
        let server = server().await;
        with_issues(&server).await;

        let result = storage(&server).list(&DevlogFilter::default()).await.unwrap();
        let ids: Vec<_> = result.items.iter().filter_map(|e| e.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(result.items[0].priority, DevlogPriority::Critical);
        assert_eq!(result.pagination.total, 1);
    }

    #[tokio::test]
    async fn test_stats_count_managed_issues() {
        let server = server().await;
        with_issues(&server).await;

        let stats = storage(&server).get_stats(&DevlogFilter::default()).await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.open_entries, 1);
    }

    #[tokio::test]
    async fn test_search_uses_search_api() {
        let server = server().await;
        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 1,
                "items": [issue_json(5, "Login timeout", &["devlog", "type:bugfix"], "", "open")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = storage(&server)
            .search("login", &DevlogFilter::default())
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].entry_type, DevlogType::Bugfix);
    }
}

mod change_feed {
    use super::*;

    fn issue_with_update(number: i64, title: &str, updated_at: &str) -> Value {
        let mut issue = issue_json(number, title, &["devlog"], "", "open");
        issue["updated_at"] = json!(updated_at);
        issue
    }

    #[tokio::test]
    async fn test_feed_polls_issue_list() {
        let server = server().await;
        let tracked = issue_with_update(1, "Tracked", "2024-05-02T12:30:00Z");
        let added = issue_with_update(2, "Added remotely", "2024-05-03T08:00:00Z");

        // baseline
        Mock::given(method("GET"))
            .and(path(format!("{}/issues", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([tracked.clone()])))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/issues", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([tracked, added.clone()])))
            .mount(&server)
            .await;

        let storage = GitHubStorage::new(config(&server), Duration::from_millis(50)).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = storage
            .subscribe(callback(move |event| {
                sink.lock().unwrap().push((event.event_type, event.entry_id()))
            }))
            .await
            .unwrap();
        assert!(storage.feed().is_polling());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while events.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[(DevlogEventType::Created, Some(2))]
        );

        // issue 1 disappears from the managed set
        Mock::given(method("GET"))
            .and(path(format!("{}/issues", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([added])))
            .with_priority(1)
            .mount(&server)
            .await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while events.lock().unwrap().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(
            events.lock().unwrap()[1],
            (DevlogEventType::Deleted, Some(1))
        );

        storage.cleanup().await.unwrap();
        assert!(!storage.feed().is_polling());
    }
}
