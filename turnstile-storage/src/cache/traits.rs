//! Cache store trait and usage statistics.
//!
//! Every backend behind a fail-over facade implements [`CacheStore`]. The
//! facade never inspects a store beyond this surface.

use std::time::Duration;

use async_trait::async_trait;
use turnstile_core::{CacheValue, StoreResult};

/// A key/value cache store.
///
/// Keys are plain strings; each store applies its own [`super::KeySpace`]
/// (prefix and default version) before touching the backend, so the same
/// `(key, version)` pair addresses the same logical entry on every store.
///
/// # TTL
///
/// - `None`: the entry never expires
/// - `Some(Duration::ZERO)`: the entry is expired as soon as it is written
///
/// # Errors
///
/// Transport failures must be reported as [`turnstile_core::StoreError::Unreachable`]
/// or [`turnstile_core::StoreError::Timeout`]; the facade treats any error
/// from the primary as a reason to fail over.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `value` only if `key` is not already present.
    ///
    /// Returns whether the value was stored.
    async fn add(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<bool>;

    /// Fetch `key`, returning `default` on a miss.
    async fn get(
        &self,
        key: &str,
        default: Option<CacheValue>,
        version: Option<i64>,
    ) -> StoreResult<Option<CacheValue>>;

    /// Store `value` unconditionally.
    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str, version: Option<i64>) -> StoreResult<()>;

    /// Remove every entry in this store.
    async fn clear(&self) -> StoreResult<()>;

    /// Backend name for logs ("memory", "lmdb", "redis").
    fn name(&self) -> &str;

    /// Usage statistics, where the backend tracks them.
    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}

impl std::fmt::Debug for dyn CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").field("name", &self.name()).finish()
    }
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently stored, expired ones included until swept.
    pub entry_count: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(StoreStats::default().hit_rate(), 0.0);
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            entry_count: 2,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
