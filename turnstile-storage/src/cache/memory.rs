//! Process-local cache store.
//!
//! Entries live in a `HashMap` behind an `RwLock`. Expired entries are
//! dropped lazily when read or overwritten.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use turnstile_core::{CacheValue, StoreError, StoreResult};

use super::expiry::{self, now_millis};
use super::key::KeySpace;
use super::traits::{CacheStore, StoreStats};

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    deadline: i64,
}

/// In-memory cache store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keys: KeySpace,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<RwLock<StoreStats>>,
}

impl MemoryStore {
    pub fn new(keys: KeySpace) -> Self {
        Self {
            keys,
            entries: Arc::default(),
            stats: Arc::default(),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = now_millis();
        self.entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| !expiry::is_expired(e.deadline, now))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Backend {
            store: "memory".to_string(),
            reason: "lock poisoned".to_string(),
        }
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn add(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<bool> {
        let key = self.keys.key(key, version).encode();
        let now = now_millis();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if let Some(existing) = entries.get(&key) {
            if !expiry::is_expired(existing.deadline, now) {
                return Ok(false);
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                deadline: expiry::deadline_from(now, ttl),
            },
        );
        Ok(true)
    }

    async fn get(
        &self,
        key: &str,
        default: Option<CacheValue>,
        version: Option<i64>,
    ) -> StoreResult<Option<CacheValue>> {
        let key = self.keys.key(key, version).encode();
        let now = now_millis();
        let found = {
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            match entries.get(&key) {
                Some(entry) if !expiry::is_expired(entry.deadline, now) => {
                    Some(Some(entry.value.clone()))
                }
                Some(_) => Some(None),
                None => None,
            }
        };
        match found {
            Some(Some(value)) => {
                self.record(true);
                Ok(Some(value))
            }
            Some(None) => {
                // Expired: sweep it
                if let Ok(mut entries) = self.entries.write() {
                    if entries
                        .get(&key)
                        .is_some_and(|e| expiry::is_expired(e.deadline, now))
                    {
                        entries.remove(&key);
                    }
                }
                self.record(false);
                Ok(default)
            }
            None => {
                self.record(false);
                Ok(default)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<()> {
        let key = self.keys.key(key, version).encode();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(
            key,
            Entry {
                value,
                deadline: expiry::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str, version: Option<i64>) -> StoreResult<()> {
        let key = self.keys.key(key, version).encode();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(&key);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn stats(&self) -> StoreStats {
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = self
            .entries
            .read()
            .map(|e| e.len() as u64)
            .unwrap_or_default();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(KeySpace::new("gw", 1))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = store();
        store
            .set("token", json!({"sub": "alice"}), None, None)
            .await
            .expect("set should succeed");
        let value = store.get("token", None, None).await.expect("get");
        assert_eq!(value, Some(json!({"sub": "alice"})));
    }

    #[tokio::test]
    async fn test_get_miss_returns_default() {
        let store = store();
        let value = store
            .get("missing", Some(json!("fallback")), None)
            .await
            .expect("get");
        assert_eq!(value, Some(json!("fallback")));
    }

    #[tokio::test]
    async fn test_add_only_when_absent() {
        let store = store();
        assert!(store.add("k", json!(1), None, None).await.expect("add"));
        assert!(!store.add("k", json!(2), None, None).await.expect("add"));
        assert_eq!(store.get("k", None, None).await.expect("get"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_versions_are_separate_entries() {
        let store = store();
        store.add("k", json!("v1"), None, Some(1)).await.expect("add");
        store.add("k", json!("v2"), None, Some(2)).await.expect("add");
        assert_eq!(
            store.get("k", None, Some(2)).await.expect("get"),
            Some(json!("v2"))
        );
        store.delete("k", Some(2)).await.expect("delete");
        assert_eq!(store.get("k", None, Some(2)).await.expect("get"), None);
        assert_eq!(
            store.get("k", None, Some(1)).await.expect("get"),
            Some(json!("v1"))
        );
    }

    #[tokio::test]
    async fn test_zero_ttl_is_expired_immediately() {
        let store = store();
        store
            .set("k", json!(1), Some(Duration::ZERO), None)
            .await
            .expect("set");
        assert_eq!(store.get("k", None, None).await.expect("get"), None);
        // An expired entry does not block add
        assert!(store.add("k", json!(2), None, None).await.expect("add"));
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let store = store();
        store.set("a", json!(1), None, None).await.expect("set");
        store.set("b", json!(2), None, None).await.expect("set");
        let _ = store.get("a", None, None).await;
        let _ = store.get("c", None, None).await;

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 2);

        store.clear().await.expect("clear");
        assert!(store.is_empty());
    }
}
