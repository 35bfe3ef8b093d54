//! Bounded LRU + TTL cache for GitHub GET responses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::config::CacheConfig;

struct Slot {
    stored_at: Instant,
    value: Value,
}

#[derive(Default)]
struct State {
    slots: HashMap<String, Slot>,
    /// Least recently used at the front.
    order: VecDeque<String>,
}

impl State {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.slots.remove(key);
        self.order.retain(|k| k != key);
    }
}

pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<State>,
}

impl ResponseCache {
    /// `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.enabled || config.max_entries == 0 {
            return None;
        }
        Some(Self::new(Duration::from_millis(config.ttl_ms), config.max_entries))
    }

    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state();
        let fresh = match state.slots.get(key) {
            Some(slot) => slot.stored_at.elapsed() < self.ttl,
            None => return None,
        };
        if !fresh {
            state.remove(key);
            return None;
        }
        state.touch(key);
        debug!(key, "cache hit");
        state.slots.get(key).map(|slot| slot.value.clone())
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut state = self.state();
        if state.slots.contains_key(&key) {
            state.touch(&key);
        } else {
            while state.slots.len() >= self.max_entries {
                match state.order.pop_front() {
                    Some(oldest) => {
                        state.slots.remove(&oldest);
                    }
                    None => break,
                }
            }
            state.order.push_back(key.clone());
        }
        state.slots.insert(
            key,
            Slot {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.state().remove(key);
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut state = self.state();
        state.slots.retain(|k, _| !k.starts_with(prefix));
        state.order.retain(|k| !k.starts_with(prefix));
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.slots.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        assert_eq!(cache.get("a"), Some(json!(1)));
        cache.put("c", json!(3));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("c"), Some(json!(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = ResponseCache::new(Duration::from_millis(0), 4);
        cache.put("a", json!("x"));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn prefix_invalidation() {
        let cache = ResponseCache::new(Duration::from_secs(60), 8);
        cache.put("issues?page=1", json!([]));
        cache.put("issues?page=2", json!([]));
        cache.put("issues/4", json!({}));
        cache.invalidate_prefix("issues?");
        assert_eq!(cache.len(), 1);
        cache.invalidate("issues/4");
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(ResponseCache::from_config(&config).is_none());
    }
}
