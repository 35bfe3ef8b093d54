//! Workspaces: named bindings from an id to a storage configuration.
//!
//! [`WorkspaceManager`] owns the lazily built provider per workspace and is
//! shared by the whole process. [`WorkspaceSession`] tracks the current
//! workspace of one caller and forwards its change events to the
//! [`EventBus`](crate::events::EventBus).

pub mod session;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::factory::ProviderFactory;
use crate::models::now_millis;
use crate::storage::StorageProvider;

pub use session::WorkspaceSession;
pub use store::{InMemoryWorkspaceStore, WorkspaceStore};

/// Id of the implicit workspace used when no workspace is configured.
pub const DEFAULT_WORKSPACE_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl WorkspaceMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            created_at: now,
            last_accessed_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub workspace: WorkspaceMetadata,
    pub storage: StorageConfig,
}

pub struct WorkspaceManager {
    store: Arc<dyn WorkspaceStore>,
    factory: Arc<ProviderFactory>,
    fallback: StorageConfig,
    providers: Mutex<HashMap<String, Arc<dyn StorageProvider>>>,
}

impl WorkspaceManager {
    /// `fallback` backs the `default` workspace while the store is empty.
    pub fn new(store: Arc<dyn WorkspaceStore>, fallback: StorageConfig) -> Self {
        Self::with_factory(store, fallback, Arc::new(ProviderFactory::new()))
    }

    pub fn with_factory(
        store: Arc<dyn WorkspaceStore>,
        fallback: StorageConfig,
        factory: Arc<ProviderFactory>,
    ) -> Self {
        Self {
            store,
            factory,
            fallback,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Manager over an empty in-memory store with the environment's
    /// storage as fallback.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            Arc::new(InMemoryWorkspaceStore::new()),
            StorageConfig::from_env()?,
        ))
    }

    pub fn factory(&self) -> &Arc<ProviderFactory> {
        &self.factory
    }

    /// True while no workspace is configured.
    pub async fn is_fallback_mode(&self) -> Result<bool> {
        Ok(self.store.list().await?.is_empty())
    }

    fn fallback_metadata(&self) -> WorkspaceMetadata {
        let mut workspace = WorkspaceMetadata::new(DEFAULT_WORKSPACE_ID, "Default");
        workspace.description = Some(format!("{} storage from environment", self.fallback.storage_type));
        workspace
    }

    /// Configured workspaces. Does not touch any provider.
    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceMetadata>> {
        let records = self.store.list().await?;
        if records.is_empty() {
            return Ok(vec![self.fallback_metadata()]);
        }
        Ok(records.into_iter().map(|record| record.workspace).collect())
    }

    pub async fn get_workspace(&self, id: &str) -> Result<WorkspaceMetadata> {
        Ok(self.record(id).await?.workspace)
    }

    async fn record(&self, id: &str) -> Result<WorkspaceRecord> {
        if let Some(record) = self.store.get(id).await? {
            return Ok(record);
        }
        if id == DEFAULT_WORKSPACE_ID && self.is_fallback_mode().await? {
            return Ok(WorkspaceRecord {
                workspace: self.fallback_metadata(),
                storage: self.fallback.clone(),
            });
        }
        Err(StorageError::WorkspaceNotFound(id.to_string()))
    }

    pub async fn default_workspace_id(&self) -> Result<String> {
        if let Some(id) = self.store.default_workspace_id().await? {
            return Ok(id);
        }
        let records = self.store.list().await?;
        Ok(records
            .into_iter()
            .next()
            .map(|record| record.workspace.id)
            .unwrap_or_else(|| DEFAULT_WORKSPACE_ID.to_string()))
    }

    pub async fn set_default_workspace(&self, id: &str) -> Result<()> {
        self.store.set_default_workspace_id(id).await
    }

    /// Provider for a workspace, constructed on first use. Initialization
    /// is left to the provider's first operation.
    pub async fn provider_for(&self, id: &str) -> Result<Arc<dyn StorageProvider>> {
        if let Some(provider) = self.providers.lock().await.get(id) {
            return Ok(provider.clone());
        }
        let record = self.record(id).await?;
        let provider = self.factory.get_or_construct(&record.storage).await?;
        debug!(workspace = id, storage = %provider.storage_type(), "workspace provider ready");
        Ok(self
            .providers
            .lock()
            .await
            .entry(id.to_string())
            .or_insert(provider)
            .clone())
    }

    pub async fn create_workspace(
        &self,
        workspace: WorkspaceMetadata,
        storage: StorageConfig,
    ) -> Result<WorkspaceMetadata> {
        if workspace.id.trim().is_empty() {
            return Err(StorageError::Validation("workspace id must not be empty".into()));
        }
        storage.resolve()?;
        let created = self.store.create(WorkspaceRecord { workspace, storage }).await?;
        if self.store.default_workspace_id().await?.is_none() {
            self.store.set_default_workspace_id(&created.workspace.id).await?;
        }
        info!(workspace = %created.workspace.id, "workspace created");
        Ok(created.workspace)
    }

    /// Cleans up the workspace's provider and removes its record. The
    /// default workspace cannot be deleted.
    pub async fn delete_workspace(&self, id: &str) -> Result<()> {
        if id == self.default_workspace_id().await? {
            return Err(StorageError::Validation(format!(
                "workspace {} is the default and cannot be deleted",
                id
            )));
        }
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StorageError::WorkspaceNotFound(id.to_string()))?;

        // A provider shared with another workspace stays alive.
        let key = record.storage.resolve()?.cache_key();
        let shared = self
            .store
            .list()
            .await?
            .iter()
            .filter(|other| other.workspace.id != id)
            .any(|other| other.storage.resolve().is_ok_and(|b| b.cache_key() == key));

        let provider = self.providers.lock().await.remove(id);
        if shared {
            debug!(workspace = id, "backend shared with another workspace, provider kept");
        } else {
            if let Some(provider) = provider
                && let Err(err) = provider.cleanup().await
            {
                warn!(workspace = id, error = %err, "provider cleanup failed");
            }
            if let Err(err) = self.factory.release(&record.storage).await {
                warn!(workspace = id, error = %err, "provider release failed");
            }
        }

        self.store.delete(id).await?;
        info!(workspace = id, "workspace deleted");
        Ok(())
    }

    /// Cleans up every provider.
    pub async fn shutdown(&self) {
        let providers: Vec<(String, Arc<dyn StorageProvider>)> = self.providers.lock().await.drain().collect();
        for (id, provider) in providers {
            if let Err(err) = provider.cleanup().await {
                warn!(workspace = %id, error = %err, "provider cleanup failed");
            }
        }
        self.factory.clear_cache().await;
        debug!("workspace manager shut down");
    }
}
