//! Storage configuration.
//!
//! A workspace binds one [`StorageConfig`]. The boundary shape is loose
//! (optional sections, a free connection string) and is resolved into the
//! closed [`BackendConfig`] enum before a provider is built:
//!
//! ```json
//! { "type": "github",
//!   "github": { "owner": "acme", "repo": "tracker", "token": "ghp_…",
//!               "mapping": { "useNativeType": true },
//!               "cache": { "ttlMs": 60000 } } }
//! ```
//!
//! Without any workspace configuration the same shape is derived from the
//! environment (see [`StorageConfig::from_env`]).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StorageError};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_MARKER_LABEL: &str = "devlog";

const JSON_POLL_MS: u64 = 2_000;
const SQLITE_POLL_MS: u64 = 2_000;
const MYSQL_POLL_MS: u64 = 3_000;
const POSTGRES_POLL_MS: u64 = 3_000;
const GITHUB_POLL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Json,
    Sqlite,
    Postgres,
    Mysql,
    Github,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Github => "github",
        }
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            "github" => Ok(Self::Github),
            _ => Err(format!("Invalid storage type: {}", s)),
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs shared by the relational backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    pub poll_interval_ms: Option<u64>,
    pub max_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonStorageConfig {
    #[serde(default = "default_json_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl Default for JsonStorageConfig {
    fn default() -> Self {
        Self {
            directory: default_json_directory(),
            poll_interval_ms: None,
        }
    }
}

fn default_json_directory() -> PathBuf {
    PathBuf::from(".devlog")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitHubMappingConfig {
    /// Map entry type onto the native issue type instead of `type:` labels.
    pub use_native_type: bool,
    /// Express done/cancelled through `state_reason`.
    pub use_state_reason: bool,
}

impl Default for GitHubMappingConfig {
    fn default() -> Self {
        Self {
            use_native_type: false,
            use_state_reason: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub requests_per_hour: u32,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: 5_000,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_entries: 500,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubStorageConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_marker_label")]
    pub marker_label: String,
    #[serde(default)]
    pub mapping: GitHubMappingConfig,
    #[serde(default)]
    pub enable_emoji_titles: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

fn default_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_marker_label() -> String {
    DEFAULT_MARKER_LABEL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl GitHubStorageConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            api_url: default_api_url(),
            marker_label: default_marker_label(),
            mapping: GitHubMappingConfig::default(),
            enable_emoji_titles: false,
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
            poll_interval_ms: None,
        }
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [("owner", &self.owner), ("repo", &self.repo), ("token", &self.token)] {
            if value.trim().is_empty() {
                return Err(StorageError::Config(format!("github.{} is required", field)));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GitHubStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubStorageConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("marker_label", &self.marker_label)
            .field("mapping", &self.mapping)
            .field("enable_emoji_titles", &self.enable_emoji_titles)
            .finish_non_exhaustive()
    }
}

/// Storage binding of a workspace, as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<StorageOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<JsonStorageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubStorageConfig>,
}

impl StorageConfig {
    fn bare(storage_type: StorageType) -> Self {
        Self {
            storage_type,
            connection_string: None,
            options: None,
            json: None,
            github: None,
        }
    }

    pub fn json(directory: impl Into<PathBuf>) -> Self {
        Self {
            json: Some(JsonStorageConfig {
                directory: directory.into(),
                poll_interval_ms: None,
            }),
            ..Self::bare(StorageType::Json)
        }
    }

    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            connection_string: Some(path.as_ref().to_string_lossy().into_owned()),
            ..Self::bare(StorageType::Sqlite)
        }
    }

    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            connection_string: Some(url.into()),
            ..Self::bare(StorageType::Postgres)
        }
    }

    pub fn mysql(url: impl Into<String>) -> Self {
        Self {
            connection_string: Some(url.into()),
            ..Self::bare(StorageType::Mysql)
        }
    }

    pub fn github(config: GitHubStorageConfig) -> Self {
        Self {
            github: Some(config),
            ..Self::bare(StorageType::Github)
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        match self.storage_type {
            StorageType::Json => {
                let mut json = self.json.take().unwrap_or_default();
                json.poll_interval_ms = Some(ms);
                self.json = Some(json);
            }
            StorageType::Github => {
                if let Some(github) = self.github.as_mut() {
                    github.poll_interval_ms = Some(ms);
                }
            }
            _ => {
                let mut options = self.options.take().unwrap_or_default();
                options.poll_interval_ms = Some(ms);
                self.options = Some(options);
            }
        }
        self
    }

    /// Validates the loose shape and produces the backend variant.
    pub fn resolve(&self) -> Result<BackendConfig> {
        let options = self.options.clone().unwrap_or_default();
        match self.storage_type {
            StorageType::Json => {
                let mut json = self.json.clone().unwrap_or_default();
                if self.json.is_none()
                    && let Some(dir) = self.connection_string.as_deref()
                {
                    json.directory = PathBuf::from(dir);
                }
                if json.poll_interval_ms.is_none() {
                    json.poll_interval_ms = options.poll_interval_ms;
                }
                Ok(BackendConfig::Json(json))
            }
            StorageType::Sqlite => {
                let path = match self.connection_string.as_deref().map(str::trim) {
                    Some(s) if !s.is_empty() => PathBuf::from(
                        s.strip_prefix("sqlite://")
                            .or_else(|| s.strip_prefix("sqlite:"))
                            .unwrap_or(s),
                    ),
                    _ => default_data_dir().join("devlog.sqlite"),
                };
                Ok(BackendConfig::Sqlite { path, options })
            }
            StorageType::Postgres => Ok(BackendConfig::Postgres {
                url: self.required_connection_string()?,
                options,
            }),
            StorageType::Mysql => Ok(BackendConfig::Mysql {
                url: self.required_connection_string()?,
                options,
            }),
            StorageType::Github => {
                let github = self.github.clone().ok_or_else(|| {
                    StorageError::Config("github storage requires a `github` section".into())
                })?;
                github.validate()?;
                Ok(BackendConfig::GitHub(github))
            }
        }
    }

    fn required_connection_string(&self) -> Result<String> {
        match self.connection_string.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(StorageError::Config(format!(
                "{} storage requires a connection string",
                self.storage_type
            ))),
        }
    }

    /// Flat configuration from process environment (and `.env`, when the
    /// caller has loaded it with dotenvy).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Environment resolution against an arbitrary lookup.
    ///
    /// `DEVLOG_STORAGE_TYPE` wins; otherwise the first configured backend
    /// in the order postgres, mysql, github, sqlite, json is used.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let postgres_url = get("POSTGRES_URL").or_else(|| {
            get("DATABASE_URL").filter(|u| u.starts_with("postgres://") || u.starts_with("postgresql://"))
        });
        let mysql_url = get("MYSQL_URL");
        let github = match (get("GITHUB_OWNER"), get("GITHUB_REPO"), get("GITHUB_TOKEN")) {
            (Some(owner), Some(repo), Some(token)) => {
                let mut cfg = GitHubStorageConfig::new(owner, repo, token);
                if let Some(api_url) = get("GITHUB_API_URL") {
                    cfg.api_url = api_url;
                }
                Some(cfg)
            }
            _ => None,
        };
        let sqlite_path = get("DEVLOG_SQLITE_PATH");
        let json_dir = get("DEVLOG_JSON_DIR");

        let storage_type = match get("DEVLOG_STORAGE_TYPE") {
            Some(explicit) => explicit.parse::<StorageType>().map_err(StorageError::Config)?,
            None if postgres_url.is_some() => StorageType::Postgres,
            None if mysql_url.is_some() => StorageType::Mysql,
            None if github.is_some() => StorageType::Github,
            None if sqlite_path.is_some() => StorageType::Sqlite,
            None => StorageType::Json,
        };

        let mut config = match storage_type {
            StorageType::Postgres => Self {
                connection_string: postgres_url,
                ..Self::bare(StorageType::Postgres)
            },
            StorageType::Mysql => Self {
                connection_string: mysql_url,
                ..Self::bare(StorageType::Mysql)
            },
            StorageType::Github => Self {
                github,
                ..Self::bare(StorageType::Github)
            },
            StorageType::Sqlite => Self {
                connection_string: sqlite_path,
                ..Self::bare(StorageType::Sqlite)
            },
            StorageType::Json => Self::json(json_dir.map(PathBuf::from).unwrap_or_else(default_json_directory)),
        };

        if let Some(ms) = get("DEVLOG_POLL_INTERVAL_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| StorageError::Config(format!("invalid DEVLOG_POLL_INTERVAL_MS: {}", ms)))?;
            config = config.with_poll_interval(Duration::from_millis(ms));
        }

        config.resolve()?;
        Ok(config)
    }
}

/// `~/.devlog`, or `.devlog` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".devlog"))
        .unwrap_or_else(|| PathBuf::from(".devlog"))
}

/// Resolved, backend-specific configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Json(JsonStorageConfig),
    Sqlite { path: PathBuf, options: StorageOptions },
    Postgres { url: String, options: StorageOptions },
    Mysql { url: String, options: StorageOptions },
    GitHub(GitHubStorageConfig),
}

impl BackendConfig {
    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::Json(_) => StorageType::Json,
            Self::Sqlite { .. } => StorageType::Sqlite,
            Self::Postgres { .. } => StorageType::Postgres,
            Self::Mysql { .. } => StorageType::Mysql,
            Self::GitHub(_) => StorageType::Github,
        }
    }

    /// Fingerprint used by the provider factory to share instances.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Json(json) => format!("json:{}", json.directory.display()),
            Self::Sqlite { path, .. } => format!("sqlite:{}", path.display()),
            Self::Postgres { url, .. } => format!("postgres:{}", url),
            Self::Mysql { url, .. } => mysql_cache_key(url),
            Self::GitHub(github) => format!("github:{}/{}", github.owner, github.repo),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        let ms = match self {
            Self::Json(json) => json.poll_interval_ms.unwrap_or(JSON_POLL_MS),
            Self::Sqlite { options, .. } => options.poll_interval_ms.unwrap_or(SQLITE_POLL_MS),
            Self::Postgres { options, .. } => options.poll_interval_ms.unwrap_or(POSTGRES_POLL_MS),
            Self::Mysql { options, .. } => options.poll_interval_ms.unwrap_or(MYSQL_POLL_MS),
            Self::GitHub(github) => github.poll_interval_ms.unwrap_or(GITHUB_POLL_MS),
        };
        Duration::from_millis(ms.max(1))
    }
}

fn mysql_cache_key(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("localhost");
            let port = parsed.port().unwrap_or(3306);
            let database = parsed.path().trim_start_matches('/');
            format!("mysql:{}:{}:{}", host, port, database)
        }
        Err(_) => format!("mysql:{}", url),
    }
}
