use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{WorkspaceManager, WorkspaceMetadata};
use crate::errors::Result;
use crate::events::EventBus;
use crate::feed::{Subscription, callback};
use crate::storage::StorageProvider;

#[derive(Default)]
struct SessionState {
    current: Option<String>,
    subscription: Option<Subscription>,
    /// Remote providers subscribe on first use.
    subscribe_pending: bool,
}

/// Current-workspace tracking for one caller (a request, a CLI run, an
/// editor window). Sessions share the manager's providers.
pub struct WorkspaceSession {
    manager: Arc<WorkspaceManager>,
    bus: EventBus,
    state: Mutex<SessionState>,
}

impl WorkspaceSession {
    pub fn new(manager: Arc<WorkspaceManager>, bus: EventBus) -> Self {
        Self {
            manager,
            bus,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn manager(&self) -> &Arc<WorkspaceManager> {
        &self.manager
    }

    pub async fn current_workspace_id(&self) -> Option<String> {
        self.state.lock().await.current.clone()
    }

    async fn subscribe(&self, id: &str, provider: &Arc<dyn StorageProvider>) -> Result<Subscription> {
        let bus = self.bus.clone();
        let workspace_id = id.to_string();
        provider
            .subscribe(callback(move |event| bus.publish(&workspace_id, event.clone())))
            .await
    }

    async fn activate(&self, state: &mut SessionState, id: &str) -> Result<Arc<dyn StorageProvider>> {
        state.subscription = None;
        state.subscribe_pending = false;

        let provider = self.manager.provider_for(id).await?;
        if provider.is_remote_storage() {
            state.subscribe_pending = true;
        } else {
            state.subscription = Some(self.subscribe(id, &provider).await?);
        }
        state.current = Some(id.to_string());
        debug!(workspace = id, remote = provider.is_remote_storage(), "switched workspace");
        Ok(provider)
    }

    /// Makes `id` current. The previous workspace's events stop flowing
    /// before the new provider is resolved.
    pub async fn switch_to_workspace(&self, id: &str) -> Result<WorkspaceMetadata> {
        let workspace = self.manager.get_workspace(id).await?;
        let mut state = self.state.lock().await;
        self.activate(&mut state, id).await?;
        Ok(workspace)
    }

    /// Provider of the current workspace, switching to the default one
    /// when none is selected yet.
    pub async fn provider(&self) -> Result<Arc<dyn StorageProvider>> {
        let mut state = self.state.lock().await;
        let (id, provider) = match state.current.clone() {
            Some(id) => {
                let provider = self.manager.provider_for(&id).await?;
                (id, provider)
            }
            None => {
                let id = self.manager.default_workspace_id().await?;
                let provider = self.activate(&mut state, &id).await?;
                (id, provider)
            }
        };
        if state.subscribe_pending {
            match self.subscribe(&id, &provider).await {
                Ok(subscription) => {
                    state.subscription = Some(subscription);
                    state.subscribe_pending = false;
                }
                Err(err) => warn!(workspace = %id, error = %err, "change subscription failed, will retry"),
            }
        }
        Ok(provider)
    }

    /// Deletes a workspace; when it is the current one the session moves to
    /// the default workspace.
    pub async fn delete_workspace(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let was_current = state.current.as_deref() == Some(id);
        if was_current {
            state.subscription = None;
            state.subscribe_pending = false;
        }
        if let Err(err) = self.manager.delete_workspace(id).await {
            if was_current {
                let id = id.to_string();
                self.activate(&mut state, &id).await?;
            }
            return Err(err);
        }
        if was_current {
            state.current = None;
            let fallback = self.manager.default_workspace_id().await?;
            self.activate(&mut state, &fallback).await?;
        }
        Ok(())
    }

    /// Drops the session's subscription.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.subscription = None;
        state.subscribe_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::models::{DevlogEntry, DevlogEventType, DevlogType};
    use crate::workspace::InMemoryWorkspaceStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Arc<WorkspaceManager>, EventBus) {
        let fallback = StorageConfig::json(dir.path().join("fallback")).with_poll_interval(Duration::from_millis(50));
        let manager = Arc::new(WorkspaceManager::new(Arc::new(InMemoryWorkspaceStore::new()), fallback));
        (manager, EventBus::new(64))
    }

    #[tokio::test]
    async fn provider_defaults_to_default_workspace() {
        let dir = TempDir::new().unwrap();
        let (manager, bus) = setup(&dir);
        let session = WorkspaceSession::new(manager, bus);
        assert!(session.current_workspace_id().await.is_none());
        session.provider().await.unwrap();
        assert_eq!(session.current_workspace_id().await.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn forwards_events_tagged_with_workspace() {
        let dir = TempDir::new().unwrap();
        let (manager, bus) = setup(&dir);
        let mut rx = bus.subscribe();
        let session = WorkspaceSession::new(manager, bus);
        session.switch_to_workspace("default").await.unwrap();

        let provider = session.provider().await.unwrap();
        provider.save(DevlogEntry::new("Watch me", DevlogType::Task)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.workspace_id, "default");
        assert_eq!(event.event.event_type, DevlogEventType::Created);
    }

    #[tokio::test]
    async fn deleting_current_workspace_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let (manager, bus) = setup(&dir);
        manager
            .create_workspace(WorkspaceMetadata::new("main", "Main"), StorageConfig::json(dir.path().join("main")))
            .await
            .unwrap();
        manager
            .create_workspace(WorkspaceMetadata::new("scratch", "Scratch"), StorageConfig::json(dir.path().join("scratch")))
            .await
            .unwrap();

        let session = WorkspaceSession::new(manager, bus);
        session.switch_to_workspace("scratch").await.unwrap();
        session.delete_workspace("scratch").await.unwrap();
        assert_eq!(session.current_workspace_id().await.as_deref(), Some("main"));
    }
}
