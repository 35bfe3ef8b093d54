use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::WorkspaceRecord;
use crate::errors::{Result, StorageError};

/// Persistence for workspace records. Where records live (a config file,
/// a database table) is up to the implementation.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<WorkspaceRecord>>;

    async fn get(&self, id: &str) -> Result<Option<WorkspaceRecord>>;

    /// `Validation` when the id is taken.
    async fn create(&self, record: WorkspaceRecord) -> Result<WorkspaceRecord>;

    /// `WorkspaceNotFound` when the id is unknown.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn default_workspace_id(&self) -> Result<Option<String>>;

    async fn set_default_workspace_id(&self, id: &str) -> Result<()>;
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, WorkspaceRecord>,
    default_id: Option<String>,
}

#[derive(Default)]
pub struct InMemoryWorkspaceStore {
    state: Mutex<State>,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = WorkspaceRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state();
            for record in records {
                state.default_id.get_or_insert_with(|| record.workspace.id.clone());
                state.records.insert(record.workspace.id.clone(), record);
            }
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn list(&self) -> Result<Vec<WorkspaceRecord>> {
        Ok(self.state().records.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkspaceRecord>> {
        Ok(self.state().records.get(id).cloned())
    }

    async fn create(&self, record: WorkspaceRecord) -> Result<WorkspaceRecord> {
        let mut state = self.state();
        let id = record.workspace.id.clone();
        if state.records.contains_key(&id) {
            return Err(StorageError::Validation(format!("workspace {} already exists", id)));
        }
        state.records.insert(id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if state.records.remove(id).is_none() {
            return Err(StorageError::WorkspaceNotFound(id.to_string()));
        }
        if state.default_id.as_deref() == Some(id) {
            state.default_id = None;
        }
        Ok(())
    }

    async fn default_workspace_id(&self) -> Result<Option<String>> {
        Ok(self.state().default_id.clone())
    }

    async fn set_default_workspace_id(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if !state.records.contains_key(id) {
            return Err(StorageError::WorkspaceNotFound(id.to_string()));
        }
        state.default_id = Some(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::workspace::WorkspaceMetadata;

    fn record(id: &str) -> WorkspaceRecord {
        WorkspaceRecord {
            workspace: WorkspaceMetadata::new(id, id.to_uppercase()),
            storage: StorageConfig::json(format!("/tmp/{}", id)),
        }
    }

    #[tokio::test]
    async fn create_get_delete() {
        let store = InMemoryWorkspaceStore::new();
        store.create(record("alpha")).await.unwrap();
        assert!(store.get("alpha").await.unwrap().is_some());

        let dup = store.create(record("alpha")).await.unwrap_err();
        assert!(matches!(dup, StorageError::Validation(_)));

        store.delete("alpha").await.unwrap();
        let missing = store.delete("alpha").await.unwrap_err();
        assert!(matches!(missing, StorageError::WorkspaceNotFound(_)));
    }

    #[tokio::test]
    async fn first_seeded_record_is_default() {
        let store = InMemoryWorkspaceStore::with_records([record("a"), record("b")]);
        assert_eq!(store.default_workspace_id().await.unwrap().as_deref(), Some("a"));
        store.set_default_workspace_id("b").await.unwrap();
        assert_eq!(store.default_workspace_id().await.unwrap().as_deref(), Some("b"));
        assert!(store.set_default_workspace_id("zzz").await.is_err());
    }
}
