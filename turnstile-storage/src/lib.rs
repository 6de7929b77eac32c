//! Turnstile Storage - Cache Stores and Fail-over
//!
//! Cache store trait with memory, LMDB and Redis implementations, and the
//! fail-over facade that multiplexes a primary and a fallback store.

pub mod cache;
pub mod failover;

pub use cache::{
    open_store, CacheKey, CacheOp, CacheReply, CacheStore, KeySpace, LmdbStore, LmdbStoreError,
    MemoryStore, StoreStats,
};
#[cfg(feature = "redis")]
pub use cache::RedisStore;
pub use failover::{
    ensure_free, reset_from_config, reset_to_primary, select_lock_provider, FailoverCache,
    FailoverStats, FileLock, FileModeIndicator, LocalLock, LockGuard, LockName,
    MemoryModeIndicator, ModeIndicator, ProbeOutcome, ProbeScheduler, RecoveryProbe,
    TransitionLock,
};
