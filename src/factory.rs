//! Provider construction and instance sharing.
//!
//! Providers are keyed by [`BackendConfig::cache_key`]. The map stores a
//! cell per key before construction starts, so concurrent callers asking
//! for the same backend wait on one construction instead of racing to open
//! two pools.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, StorageConfig};
use crate::errors::Result;
use crate::storage::{GitHubStorage, JsonStorage, RelationalStorage, StorageProvider};

type Slot = Arc<OnceCell<Arc<dyn StorageProvider>>>;

/// Builds the adapter for a resolved configuration. Construction is cheap
/// and performs no I/O; connections open on `initialize()`.
pub fn build_provider(backend: &BackendConfig) -> Result<Arc<dyn StorageProvider>> {
    let poll = backend.poll_interval();
    let provider: Arc<dyn StorageProvider> = match backend {
        BackendConfig::Json(json) => Arc::new(JsonStorage::new(json, poll)),
        BackendConfig::Sqlite { path, .. } => Arc::new(RelationalStorage::sqlite(path, poll)?),
        BackendConfig::Postgres { url, options } => Arc::new(RelationalStorage::postgres(url, options, poll)?),
        BackendConfig::Mysql { url, options } => Arc::new(RelationalStorage::mysql(url, options, poll)?),
        BackendConfig::GitHub(github) => Arc::new(GitHubStorage::new(github.clone(), poll)?),
    };
    Ok(provider)
}

/// Log-safe form of a cache key. Keys of server backends embed credentials.
fn fingerprint(key: &str) -> String {
    let kind = key.split(':').next().unwrap_or("unknown");
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("{}#{}", kind, &digest[..12])
}

#[derive(Default)]
pub struct ProviderFactory {
    instances: Mutex<HashMap<String, Slot>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &str) -> Slot {
        self.instances().entry(key.to_string()).or_default().clone()
    }

    /// Removes `key` only while it still maps to `slot`; a retry may
    /// already have installed a fresh cell.
    fn evict(&self, key: &str, slot: &Slot) {
        let mut instances = self.instances();
        if instances.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            instances.remove(key);
        }
    }

    async fn construct(&self, backend: &BackendConfig) -> Result<(String, Slot, Arc<dyn StorageProvider>)> {
        let key = backend.cache_key();
        let slot = self.slot(&key);
        let built = slot
            .get_or_try_init(|| async {
                debug!(backend = %fingerprint(&key), "constructing storage provider");
                build_provider(backend)
            })
            .await
            .cloned();
        match built {
            Ok(provider) => Ok((key, slot, provider)),
            Err(err) => {
                warn!(backend = %fingerprint(&key), error = %err, "storage provider construction failed");
                self.evict(&key, &slot);
                Err(err)
            }
        }
    }

    /// Shared provider for `config`, constructed but not initialized.
    pub async fn get_or_construct(&self, config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
        let backend = config.resolve()?;
        let (_, _, provider) = self.construct(&backend).await?;
        Ok(provider)
    }

    /// Shared provider for `config`, initialized. A failed initialization
    /// evicts the instance so the next call starts over.
    pub async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
        let backend = config.resolve()?;
        let (key, slot, provider) = self.construct(&backend).await?;
        if let Err(err) = provider.initialize().await {
            warn!(backend = %fingerprint(&key), error = %err, "storage provider failed to initialize");
            self.evict(&key, &slot);
            return Err(err);
        }
        info!(backend = %fingerprint(&key), storage = %provider.storage_type(), "storage provider ready");
        Ok(provider)
    }

    /// Drops the cached instance for `config` and cleans it up.
    pub async fn release(&self, config: &StorageConfig) -> Result<()> {
        let key = config.resolve()?.cache_key();
        let slot = self.instances().remove(&key);
        if let Some(provider) = slot.as_ref().and_then(|slot| slot.get()) {
            provider.cleanup().await?;
            debug!(backend = %fingerprint(&key), "storage provider released");
        }
        Ok(())
    }

    /// Cleans up and forgets every cached provider. Cleanup failures are
    /// logged.
    pub async fn clear_cache(&self) {
        use futures::future::join_all;

        let drained: Vec<(String, Slot)> = self.instances().drain().collect();
        let cleanups = drained.iter().filter_map(|(key, slot)| {
            let provider = slot.get()?.clone();
            Some(async move { (key, provider.cleanup().await) })
        });
        for (key, result) in join_all(cleanups).await {
            if let Err(err) = result {
                warn!(backend = %fingerprint(key), error = %err, "storage provider cleanup failed");
            }
        }
    }

    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.instances().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_cached(&self, config: &StorageConfig) -> bool {
        match config.resolve() {
            Ok(backend) => self.instances().contains_key(&backend.cache_key()),
            Err(_) => false,
        }
    }
}
