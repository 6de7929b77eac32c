//! Turnstile Test Utilities
//!
//! Shared test infrastructure for the Turnstile workspace:
//! - Failure-injecting stores and indicators
//! - A journal recording the order of store and indicator calls
//! - A ready-made fail-over fixture
//! - Proptest generators for cache operations

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use turnstile_core::{
    CacheValue, CoordinationError, CoordinationResult, FailoverConfig, StoreError, StoreResult,
};
use turnstile_storage::{
    CacheOp, CacheStore, FailoverCache, KeySpace, LocalLock, MemoryModeIndicator, MemoryStore,
    ModeIndicator, StoreStats, TransitionLock,
};

// Re-export core types for convenience
pub use turnstile_core::CacheRole;
pub use turnstile_storage::ProbeOutcome;

// ============================================================================
// JOURNAL
// ============================================================================

/// Ordered record of calls made across several test doubles.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// How a [`FlakyStore`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Behavior {
    /// Delegate to the inner memory store
    Healthy = 0,
    /// Fail every call with `StoreError::Unreachable`
    Unreachable = 1,
    /// Never answer (sleeps far past any test timeout)
    Hang = 2,
}

impl Behavior {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Behavior::Unreachable,
            2 => Behavior::Hang,
            _ => Behavior::Healthy,
        }
    }
}

/// A call seen by a [`FlakyStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: &'static str,
    pub key: Option<String>,
    pub version: Option<i64>,
}

/// Memory store whose availability can be switched at runtime.
///
/// Every call is logged (with its version argument) before the behavior is
/// applied, and also written to the shared [`Journal`] as `<label>.<op>`.
#[derive(Debug)]
pub struct FlakyStore {
    label: &'static str,
    inner: MemoryStore,
    behavior: AtomicU8,
    clear_behavior: AtomicU8,
    calls: Mutex<Vec<StoreCall>>,
    journal: Journal,
}

impl FlakyStore {
    pub fn new(label: &'static str, journal: Journal) -> Self {
        Self {
            label,
            inner: MemoryStore::new(KeySpace::default()),
            behavior: AtomicU8::new(Behavior::Healthy as u8),
            clear_behavior: AtomicU8::new(Behavior::Healthy as u8),
            calls: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// Switch every operation to `behavior`.
    pub fn set_behavior(&self, behavior: Behavior) {
        self.behavior.store(behavior as u8, Ordering::SeqCst);
    }

    /// Override the behavior of `clear` only.
    pub fn set_clear_behavior(&self, behavior: Behavior) {
        self.clear_behavior.store(behavior as u8, Ordering::SeqCst);
    }

    pub fn behavior(&self) -> Behavior {
        Behavior::from_u8(self.behavior.load(Ordering::SeqCst))
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls of a given operation.
    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn reset_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// The wrapped store, bypassing failure injection and logging.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    async fn enter(
        &self,
        op: &'static str,
        key: Option<&str>,
        version: Option<i64>,
    ) -> StoreResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(StoreCall {
                op,
                key: key.map(str::to_string),
                version,
            });
        }
        self.journal.record(format!("{}.{}", self.label, op));

        let behavior = match Behavior::from_u8(self.clear_behavior.load(Ordering::SeqCst)) {
            clear if op == "clear" && clear != Behavior::Healthy => clear,
            _ => self.behavior(),
        };
        match behavior {
            Behavior::Healthy => Ok(()),
            Behavior::Unreachable => Err(StoreError::Unreachable {
                store: self.label.to_string(),
                reason: "injected failure".to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(StoreError::Timeout {
                    store: self.label.to_string(),
                    after: Duration::from_secs(3600),
                })
            }
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn add(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<bool> {
        self.enter("add", Some(key), version).await?;
        self.inner.add(key, value, ttl, version).await
    }

    async fn get(
        &self,
        key: &str,
        default: Option<CacheValue>,
        version: Option<i64>,
    ) -> StoreResult<Option<CacheValue>> {
        self.enter("get", Some(key), version).await?;
        self.inner.get(key, default, version).await
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<()> {
        self.enter("set", Some(key), version).await?;
        self.inner.set(key, value, ttl, version).await
    }

    async fn delete(&self, key: &str, version: Option<i64>) -> StoreResult<()> {
        self.enter("delete", Some(key), version).await?;
        self.inner.delete(key, version).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.enter("clear", None, None).await?;
        self.inner.clear().await
    }

    fn name(&self) -> &str {
        self.label
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

// ============================================================================
// JOURNALING INDICATOR
// ============================================================================

/// Memory indicator that journals its calls and counts fail-over edges.
#[derive(Debug)]
pub struct JournalingIndicator {
    inner: MemoryModeIndicator,
    journal: Journal,
    edges: AtomicUsize,
    fail_remove: AtomicBool,
}

impl JournalingIndicator {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: MemoryModeIndicator::new(),
            journal,
            edges: AtomicUsize::new(0),
            fail_remove: AtomicBool::new(false),
        }
    }

    /// Number of `create` calls that flipped the indicator to present.
    pub fn edges(&self) -> usize {
        self.edges.load(Ordering::SeqCst)
    }

    /// Make `remove` fail.
    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Whether the indicator is present, ignoring errors.
    pub fn is_present(&self) -> bool {
        self.inner.exists().unwrap_or(false)
    }
}

impl ModeIndicator for JournalingIndicator {
    fn exists(&self) -> CoordinationResult<bool> {
        self.inner.exists()
    }

    fn create(&self) -> CoordinationResult<bool> {
        let created = self.inner.create()?;
        self.journal.record("indicator.create");
        if created {
            self.edges.fetch_add(1, Ordering::SeqCst);
        }
        Ok(created)
    }

    fn remove(&self) -> CoordinationResult<()> {
        self.journal.record("indicator.remove");
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(CoordinationError::Indicator {
                reason: "injected failure".to_string(),
            });
        }
        self.inner.remove()
    }
}

// ============================================================================
// FIXTURE
// ============================================================================

/// Configuration with timeouts short enough for tests.
pub fn test_config() -> FailoverConfig {
    FailoverConfig::new()
        .with_op_timeout(Duration::from_millis(100))
        .with_probe_timeout(Duration::from_millis(50))
        .with_probe_concurrency(1)
}

/// A facade over two [`FlakyStore`]s with a journaling indicator and
/// process-local locks.
pub struct FailoverFixture {
    pub cache: Arc<FailoverCache>,
    pub primary: Arc<FlakyStore>,
    pub fallback: Arc<FlakyStore>,
    pub indicator: Arc<JournalingIndicator>,
    pub locks: Arc<LocalLock>,
    pub journal: Journal,
}

impl FailoverFixture {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &FailoverConfig) -> Self {
        let journal = Journal::new();
        let primary = Arc::new(FlakyStore::new("primary", journal.clone()));
        let fallback = Arc::new(FlakyStore::new("fallback", journal.clone()));
        let indicator = Arc::new(JournalingIndicator::new(journal.clone()));
        let locks = Arc::new(LocalLock::new());

        let cache = FailoverCache::new(
            primary.clone(),
            fallback.clone(),
            indicator.clone(),
            locks.clone(),
            config,
        )
        .expect("memory indicator cannot fail to clear");
        // Construction clears the indicator; start each test from a clean log.
        journal.clear();

        Self {
            cache: Arc::new(cache),
            primary,
            fallback,
            indicator,
            locks,
            journal,
        }
    }

    /// Put the facade into fallback mode as if another worker had failed over.
    pub fn force_fallback(&self) {
        let _ = self.indicator.create();
    }

    /// Hold a transition lock on behalf of "another worker".
    pub fn hold_lock(&self, name: turnstile_storage::LockName) -> bool {
        self.locks.try_acquire(name).unwrap_or(false)
    }
}

impl Default for FailoverFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds or `timeout` passes. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Cache keys as the gateway uses them.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_:]{0,23}"
    }

    pub fn arb_version() -> impl Strategy<Value = Option<i64>> {
        prop::option::of(1i64..5)
    }

    pub fn arb_ttl() -> impl Strategy<Value = Option<Duration>> {
        prop::option::of((1u64..3600).prop_map(Duration::from_secs))
    }

    pub fn arb_value() -> impl Strategy<Value = CacheValue> {
        prop_oneof![
            any::<bool>().prop_map(CacheValue::from),
            any::<i64>().prop_map(CacheValue::from),
            "[ -~]{0,32}".prop_map(CacheValue::from),
        ]
    }

    /// Any operation except `clear`.
    pub fn arb_keyed_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            (arb_key(), arb_value(), arb_ttl(), arb_version()).prop_map(
                |(key, value, ttl, version)| CacheOp::Add {
                    key,
                    value,
                    ttl,
                    version
                }
            ),
            (arb_key(), prop::option::of(arb_value()), arb_version()).prop_map(
                |(key, default, version)| CacheOp::Get {
                    key,
                    default,
                    version
                }
            ),
            (arb_key(), arb_value(), arb_ttl())
                .prop_map(|(key, value, ttl)| CacheOp::Set { key, value, ttl }),
            (arb_key(), arb_version()).prop_map(|(key, version)| CacheOp::Delete { key, version }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_flaky_store_logs_and_fails() {
        let journal = Journal::new();
        let store = FlakyStore::new("primary", journal.clone());

        store.set("k", json!(1), None, Some(3)).await.expect("healthy");
        store.set_behavior(Behavior::Unreachable);
        let err = store.get("k", None, None).await.expect_err("unreachable");
        assert!(err.is_transient());

        assert_eq!(store.count("set"), 1);
        assert_eq!(store.calls()[0].version, Some(3));
        assert_eq!(journal.entries(), vec!["primary.set", "primary.get"]);
    }

    #[tokio::test]
    async fn test_clear_behavior_is_independent() {
        let store = FlakyStore::new("fallback", Journal::new());
        store.set_clear_behavior(Behavior::Unreachable);
        store.set("k", json!(1), None, None).await.expect("set still works");
        assert!(store.clear().await.is_err());
    }

    #[test]
    fn test_journaling_indicator_counts_edges() {
        let journal = Journal::new();
        let indicator = JournalingIndicator::new(journal.clone());
        assert!(indicator.create().expect("create"));
        assert!(!indicator.create().expect("create"));
        assert_eq!(indicator.edges(), 1);

        indicator.set_fail_remove(true);
        assert!(indicator.remove().is_err());
        assert!(indicator.is_present());
        assert_eq!(journal.count("indicator.create"), 2);
    }
}
