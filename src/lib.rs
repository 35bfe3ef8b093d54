//! Storage layer for devlog entries.
//!
//! One [`StorageProvider`](storage::StorageProvider) contract over JSON
//! files, SQLite, PostgreSQL, MySQL and GitHub Issues, a polling
//! [change feed](feed), a deduplicating [provider factory](factory) and
//! [workspace](workspace) indirection on top.

pub mod config;
pub mod errors;
pub mod events;
pub mod factory;
pub mod feed;
pub mod logging;
pub mod manager;
pub mod models;
pub mod query;
pub mod storage;
pub mod workspace;

pub use config::{BackendConfig, StorageConfig, StorageType};
pub use errors::{Result, StorageError};
pub use events::{EventBus, WorkspaceEvent};
pub use factory::ProviderFactory;
pub use feed::{ChangeFeed, ChangeSource, EventCallback, Subscription};
pub use manager::DevlogManager;
pub use models::{DevlogEntry, DevlogEvent, DevlogFilter, DevlogId, DevlogNote};
pub use storage::StorageProvider;
pub use workspace::{WorkspaceManager, WorkspaceSession};
