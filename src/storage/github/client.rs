//! GitHub REST client scoped to one repository.
//!
//! Every call goes through [`RateBudget`] and a bounded retry loop; GET
//! responses are cached as JSON values unless the caller asks for a fresh
//! read. Writes invalidate the keys they affect.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::cache::ResponseCache;
use super::rate_limit::{RateBudget, is_rate_limited};
use crate::config::GitHubStorageConfig;
use crate::errors::{Result, StorageError};

const USER_AGENT: &str = concat!("devlog-storage/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
pub const PER_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubIssueType {
    pub name: String,
}

/// A GitHub issue (subset of fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub state_reason: Option<String>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub assignee: Option<GitHubUser>,
    #[serde(default, rename = "type")]
    pub issue_type: Option<GitHubIssueType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: String,
    /// Pull requests also come through the issues endpoint; filter them out.
    #[serde(default)]
    pub pull_request: Option<Value>,
}

impl GitHubIssue {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name.eq_ignore_ascii_case(name))
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state.eq_ignore_ascii_case("closed")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubComment {
    pub id: i64,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<GitHubIssue>,
}

/// Create/update body for an issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssuePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    repo_url: String,
    repo_slug: String,
    budget: RateBudget,
    cache: Option<ResponseCache>,
}

impl GitHubClient {
    pub fn new(config: &GitHubStorageConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StorageError::Config(format!("cannot build HTTP client: {}", e)))?;
        let base = config.api_url.trim_end_matches('/');
        Ok(Self {
            http,
            token: config.token.clone(),
            repo_url: format!("{}/repos/{}/{}", base, config.owner, config.repo),
            repo_slug: format!("{}/{}", config.owner, config.repo),
            budget: RateBudget::new(&config.rate_limit),
            cache: ResponseCache::from_config(&config.cache),
        })
    }

    pub fn repo_slug(&self) -> &str {
        &self.repo_slug
    }

    fn api_root(&self) -> &str {
        self.repo_url
            .rsplit_once("/repos/")
            .map_or(self.repo_url.as_str(), |(root, _)| root)
    }

    /// Sends one request with budget and retry. Non-2xx responses become
    /// errors, so callers only ever see successful responses.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let max_retries = self.budget.max_retries();
        let mut attempt = 0u32;
        loop {
            self.budget.acquire().await?;
            let mut request = self
                .http
                .request(method.clone(), url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header(ACCEPT, "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    self.budget.observe(response.headers());
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let throttled = is_rate_limited(status.as_u16(), response.headers());
                    let retryable = throttled || status.is_server_error();
                    if retryable && attempt < max_retries {
                        let delay = if throttled {
                            self.budget.retry_delay(response.headers(), attempt)
                        } else {
                            self.budget.backoff(attempt)
                        };
                        warn!(
                            %method, url, status = status.as_u16(), attempt,
                            delay_ms = delay.as_millis() as u64,
                            "GitHub request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(error_from_response(response, throttled).await);
                }
                Err(err) if (err.is_timeout() || err.is_connect()) && attempt < max_retries => {
                    let delay = self.budget.backoff(attempt);
                    warn!(%method, url, error = %err, attempt, "GitHub request did not complete, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn get_value(&self, url: &str, query: &[(&str, String)], fresh: bool) -> Result<Value> {
        let key = cache_key(url, query);
        if !fresh
            && let Some(cache) = &self.cache
            && let Some(value) = cache.get(&key)
        {
            return Ok(value);
        }
        let value: Value = self.send(Method::GET, url, query, None).await?.json().await?;
        if let Some(cache) = &self.cache {
            cache.put(key, value.clone());
        }
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)], fresh: bool) -> Result<T> {
        Ok(serde_json::from_value(self.get_value(url, query, fresh).await?)?)
    }

    async fn write<T: DeserializeOwned>(&self, method: Method, url: &str, body: &Value) -> Result<T> {
        Ok(self.send(method, url, &[], Some(body)).await?.json().await?)
    }

    fn issue_url(&self, number: i64) -> String {
        format!("{}/issues/{}", self.repo_url, number)
    }

    fn comments_url(&self, number: i64) -> String {
        format!("{}/issues/{}/comments", self.repo_url, number)
    }

    /// Drops cached reads of one issue plus every cached issue listing.
    pub fn invalidate_issue(&self, number: i64) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&cache_key(&self.issue_url(number), &[]));
            cache.invalidate_prefix(&cache_key(&self.comments_url(number), &[]));
            cache.invalidate_prefix(&format!("{}/issues?", self.repo_url));
            cache.invalidate_prefix(&format!("{}/search/issues?", self.api_root()));
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    // ── Repository ──────────────────────────────────────────────────

    pub async fn get_repository(&self) -> Result<Value> {
        self.get_value(&self.repo_url, &[], true).await
    }

    pub async fn list_label_names(&self) -> Result<Vec<String>> {
        let url = format!("{}/labels", self.repo_url);
        let mut names = Vec::new();
        let mut page = 1u32;
        loop {
            let labels: Vec<GitHubLabel> = self
                .get(&url, &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())], true)
                .await?;
            let count = labels.len();
            names.extend(labels.into_iter().map(|l| l.name));
            if count < PER_PAGE as usize {
                break;
            }
            page += 1;
        }
        Ok(names)
    }

    pub async fn create_label(&self, name: &str, color: &str, description: &str) -> Result<()> {
        let url = format!("{}/labels", self.repo_url);
        let body = serde_json::json!({ "name": name, "color": color, "description": description });
        let _: Value = self.write(Method::POST, &url, &body).await?;
        debug!(label = name, "created GitHub label");
        Ok(())
    }

    // ── Issues ──────────────────────────────────────────────────────

    /// `None` when the issue does not exist.
    pub async fn get_issue(&self, number: i64, fresh: bool) -> Result<Option<GitHubIssue>> {
        match self.get(&self.issue_url(number), &[], fresh).await {
            Ok(issue) => Ok(Some(issue)),
            Err(StorageError::GitHub { status: 404 | 410, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Every issue and pull request in the repository, optionally only
    /// those updated at or after `since`.
    pub async fn list_issues(&self, since: Option<DateTime<Utc>>, fresh: bool) -> Result<Vec<GitHubIssue>> {
        let url = format!("{}/issues", self.repo_url);
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let mut query = vec![
                ("state", "all".to_string()),
                ("sort", "updated".to_string()),
                ("direction", "desc".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            if let Some(since) = since {
                query.push(("since", since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
            }
            let issues: Vec<GitHubIssue> = self.get(&url, &query, fresh).await?;
            let count = issues.len();
            all.extend(issues);
            if count < PER_PAGE as usize {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn search_issues(&self, query: &str) -> Result<Vec<GitHubIssue>> {
        let url = format!("{}/search/issues", self.api_root());
        let q = format!("repo:{} is:issue {}", self.repo_slug, query);
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let response: SearchResponse = self
                .get(
                    &url,
                    &[("q", q.clone()), ("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
                    false,
                )
                .await?;
            let count = response.items.len();
            all.extend(response.items);
            // Search caps results at 1000.
            if count < PER_PAGE as usize || page >= 10 {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn create_issue(&self, payload: &IssuePayload) -> Result<GitHubIssue> {
        let url = format!("{}/issues", self.repo_url);
        let issue: GitHubIssue = self.write(Method::POST, &url, &serde_json::to_value(payload)?).await?;
        self.invalidate_issue(issue.number);
        Ok(issue)
    }

    pub async fn update_issue(&self, number: i64, payload: &IssuePayload) -> Result<GitHubIssue> {
        let issue = self
            .write(Method::PATCH, &self.issue_url(number), &serde_json::to_value(payload)?)
            .await;
        self.invalidate_issue(number);
        issue
    }

    // ── Comments ────────────────────────────────────────────────────

    pub async fn list_comments(&self, number: i64, fresh: bool) -> Result<Vec<GitHubComment>> {
        let url = self.comments_url(number);
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let comments: Vec<GitHubComment> = self
                .get(&url, &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())], fresh)
                .await?;
            let count = comments.len();
            all.extend(comments);
            if count < PER_PAGE as usize {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn create_comment(&self, number: i64, body: &str) -> Result<GitHubComment> {
        let comment = self
            .write(Method::POST, &self.comments_url(number), &serde_json::json!({ "body": body }))
            .await;
        self.invalidate_issue(number);
        comment
    }

    pub async fn update_comment(&self, number: i64, comment_id: i64, body: &str) -> Result<GitHubComment> {
        let url = format!("{}/issues/comments/{}", self.repo_url, comment_id);
        let comment = self
            .write(Method::PATCH, &url, &serde_json::json!({ "body": body }))
            .await;
        self.invalidate_issue(number);
        comment
    }

    pub async fn delete_comment(&self, number: i64, comment_id: i64) -> Result<()> {
        let url = format!("{}/issues/comments/{}", self.repo_url, comment_id);
        let result = self.send(Method::DELETE, &url, &[], None).await.map(|_| ());
        self.invalidate_issue(number);
        result
    }
}

fn cache_key(url: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let params: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", url, params.join("&"))
}

async fn error_from_response(response: Response, throttled: bool) -> StorageError {
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    if throttled {
        return StorageError::RateLimit(message);
    }
    if status == StatusCode::UNAUTHORIZED {
        return StorageError::Connection(format!("GitHub rejected the token: {}", message));
    }
    StorageError::GitHub {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_include_query() {
        assert_eq!(cache_key("https://x/issues/1", &[]), "https://x/issues/1");
        assert_eq!(
            cache_key("https://x/issues", &[("state", "all".into()), ("page", "2".into())]),
            "https://x/issues?state=all&page=2"
        );
    }

    #[test]
    fn issue_deserializes_with_optional_fields() {
        let json = r#"{
            "number": 42,
            "title": "Bug: something broken",
            "body": null,
            "state": "closed",
            "state_reason": "not_planned",
            "labels": [{"name": "devlog", "color": "ededed"}],
            "created_at": "2024-01-01T10:00:00Z",
            "updated_at": "2024-01-02T10:00:00Z",
            "html_url": "https://github.com/o/r/issues/42"
        }"#;
        let issue: GitHubIssue = serde_json::from_str(json).unwrap();
        assert!(issue.is_closed());
        assert!(issue.has_label("DevLog"));
        assert!(!issue.is_pull_request());
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn payload_omits_unset_fields() {
        let payload = IssuePayload {
            state: Some("closed".into()),
            state_reason: Some("not_planned".into()),
            labels: Some(Vec::new()),
            ..IssuePayload::default()
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"state": "closed", "state_reason": "not_planned", "labels": []})
        );
    }

    #[test]
    fn api_root_is_derived_from_repo_url() {
        let mut config = GitHubStorageConfig::new("octo", "devlog", "ghp_x");
        config.api_url = "http://127.0.0.1:9999/".into();
        let client = GitHubClient::new(&config).unwrap();
        assert_eq!(client.api_root(), "http://127.0.0.1:9999");
        assert_eq!(client.repo_slug(), "octo/devlog");
    }
}
