//! Cache stores.
//!
//! Every backend implements [`CacheStore`] with the same key, TTL and miss
//! semantics, so a fail-over facade can put any two of them behind one
//! surface. Backends:
//!
//! - [`MemoryStore`]: process-local, for tests and single-process runtimes
//! - [`LmdbStore`]: host-local and persistent, the usual fallback
//! - `RedisStore`: networked, the usual primary (feature `redis`)

pub mod expiry;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod op;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod traits;

use std::sync::Arc;

#[cfg(not(feature = "redis"))]
use turnstile_core::StoreError;
use turnstile_core::{FailoverConfig, StoreLocation, StoreResult};

pub use key::{CacheKey, KeySpace};
pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;
pub use op::{CacheOp, CacheReply};
#[cfg(feature = "redis")]
pub use redis_backend::RedisStore;
pub use traits::{CacheStore, StoreStats};

/// Build the store described by `location`, using the key prefix and
/// default version from `config`.
pub fn open_store(
    location: &StoreLocation,
    config: &FailoverConfig,
) -> StoreResult<Arc<dyn CacheStore>> {
    let keys = KeySpace::new(config.key_prefix.clone(), config.default_version);
    match location {
        StoreLocation::Memory => Ok(Arc::new(MemoryStore::new(keys))),
        StoreLocation::Lmdb { path, max_size_mb } => {
            Ok(Arc::new(LmdbStore::new(path, *max_size_mb, keys)?))
        }
        #[cfg(feature = "redis")]
        StoreLocation::Redis { url } => Ok(Arc::new(RedisStore::new(url, keys)?)),
        #[cfg(not(feature = "redis"))]
        StoreLocation::Redis { .. } => Err(StoreError::Backend {
            store: "redis".to_string(),
            reason: "built without the redis feature".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_memory_store_uses_config_keys() {
        let config = FailoverConfig::new().with_key_prefix("gw");
        let store = open_store(&StoreLocation::Memory, &config).expect("memory store");
        assert_eq!(store.name(), "memory");
        store.set("k", json!(true), None, None).await.expect("set");
        assert_eq!(store.get("k", None, Some(1)).await.expect("get"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_open_lmdb_store() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let location = StoreLocation::Lmdb {
            path: dir.path().join("fallback"),
            max_size_mb: 4,
        };
        let store = open_store(&location, &FailoverConfig::new()).expect("lmdb store");
        assert_eq!(store.name(), "lmdb");
    }
}
