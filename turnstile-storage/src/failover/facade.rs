//! The fail-over cache facade.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use turnstile_core::{
    CacheRole, CacheValue, FailoverConfig, HealthCheck, StoreResult, TurnstileResult,
};

use super::indicator::{FileModeIndicator, ModeIndicator};
use super::lock::{select_lock_provider, TransitionLock};
use super::probe::{ProbeOutcome, ProbeScheduler, RecoveryProbe};
use super::stats::FailoverStats;
use super::transition::Transitions;
use crate::cache::{open_store, CacheOp, CacheReply, CacheStore};

/// A cache that serves from a primary store and moves every worker on the
/// host to a fallback store when the primary fails.
///
/// Construct one per process at start-up and share it by `Arc`. Construction
/// clears the mode indicator: a fresh process always starts on the primary.
///
/// # Example
///
/// ```ignore
/// let cache = Arc::new(FailoverCache::from_config(&FailoverConfig::from_env()?)?);
/// cache.set("session:42", json!({"sub": "alice"}), None, None).await?;
/// ```
#[derive(Debug)]
pub struct FailoverCache {
    transitions: Arc<Transitions>,
    scheduler: ProbeScheduler,
}

impl FailoverCache {
    /// Assemble a facade from its parts.
    ///
    /// Fails only if the mode indicator cannot be cleared.
    pub fn new(
        primary: Arc<dyn CacheStore>,
        fallback: Arc<dyn CacheStore>,
        indicator: Arc<dyn ModeIndicator>,
        locks: Arc<dyn TransitionLock>,
        config: &FailoverConfig,
    ) -> TurnstileResult<Self> {
        indicator.remove()?;

        debug!(
            primary = primary.name(),
            fallback = fallback.name(),
            locks = locks.backend(),
            "Fail-over cache ready on primary"
        );

        Ok(Self {
            transitions: Arc::new(Transitions::new(primary, fallback, indicator, locks, config)),
            scheduler: ProbeScheduler::new(config.probe_concurrency),
        })
    }

    /// Open both stores, the file indicator and the lock provider described
    /// by `config`.
    pub fn from_config(config: &FailoverConfig) -> TurnstileResult<Self> {
        config.validate()?;
        let primary = open_store(&config.primary, config)?;
        let fallback = open_store(&config.fallback, config)?;
        let indicator = Arc::new(FileModeIndicator::new(&config.indicator_path));
        let locks = select_lock_provider(config)?;
        Self::new(primary, fallback, indicator, locks, config)
    }

    /// Store `value` only if `key` is absent.
    pub async fn add(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<bool> {
        let op = CacheOp::Add {
            key: key.to_string(),
            value,
            ttl,
            version,
        };
        self.dispatch(op).await.map(CacheReply::into_added)
    }

    /// Fetch `key`, returning `default` on a miss.
    pub async fn get(
        &self,
        key: &str,
        default: Option<CacheValue>,
        version: Option<i64>,
    ) -> StoreResult<Option<CacheValue>> {
        let op = CacheOp::Get {
            key: key.to_string(),
            default,
            version,
        };
        self.dispatch(op).await.map(CacheReply::into_value)
    }

    /// Store `value` unconditionally.
    ///
    /// `version` is accepted for signature compatibility but not forwarded:
    /// the entry is always written at the store's default version.
    pub async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        _version: Option<i64>,
    ) -> StoreResult<()> {
        let op = CacheOp::Set {
            key: key.to_string(),
            value,
            ttl,
        };
        self.dispatch(op).await.map(|_| ())
    }

    /// Remove `key`.
    pub async fn delete(&self, key: &str, version: Option<i64>) -> StoreResult<()> {
        let op = CacheOp::Delete {
            key: key.to_string(),
            version,
        };
        self.dispatch(op).await.map(|_| ())
    }

    /// Remove every entry from the active store.
    pub async fn clear(&self) -> StoreResult<()> {
        self.dispatch(CacheOp::Clear).await.map(|_| ())
    }

    /// Route one operation to the active store.
    ///
    /// On the fallback, the result is returned as is and a recovery probe is
    /// started in the background. On the primary, any error or timeout
    /// fails over and the operation is retried once on the fallback; only
    /// the fallback's error reaches the caller.
    pub async fn dispatch(&self, op: CacheOp) -> StoreResult<CacheReply> {
        let t = &self.transitions;
        match t.active_mode() {
            CacheRole::Fallback => {
                let result = t.run(CacheRole::Fallback, &op).await;
                // Fire and forget: dropping the handle detaches the task
                drop(self.schedule_probe());
                result
            }
            CacheRole::Primary => match t.run(CacheRole::Primary, &op).await {
                Ok(reply) => Ok(reply),
                Err(e) => {
                    debug!(op = op.name(), error = %e, "Primary cache operation failed");
                    t.fail_over();
                    t.run(CacheRole::Fallback, &op).await.inspect_err(|e| {
                        warn!(op = op.name(), error = %e, "Fallback cache operation failed");
                    })
                }
            },
        }
    }

    /// Start a recovery probe in the background.
    pub fn schedule_probe(&self) -> JoinHandle<ProbeOutcome> {
        self.scheduler
            .schedule(RecoveryProbe::new(Arc::clone(&self.transitions)))
    }

    /// Run a recovery probe in the current task and return its outcome.
    pub async fn check_primary(&self) -> ProbeOutcome {
        self.transitions.counters.probe_scheduled();
        let outcome = RecoveryProbe::new(Arc::clone(&self.transitions))
            .run()
            .await;
        self.transitions.counters.probe_completed();
        outcome
    }

    /// The store currently serving requests.
    pub fn active_mode(&self) -> CacheRole {
        self.transitions.active_mode()
    }

    /// Transition counters for this process.
    pub fn stats(&self) -> FailoverStats {
        self.transitions.counters.snapshot()
    }

    /// Health report: healthy on the primary, degraded on the fallback.
    pub fn health(&self) -> HealthCheck {
        let stats = self.stats();
        HealthCheck::for_cache("cache", self.active_mode())
            .with_metadata("failovers", serde_json::json!(stats.failovers))
            .with_metadata("failbacks", serde_json::json!(stats.failbacks))
            .with_metadata(
                "locks",
                serde_json::json!(self.transitions.locks.backend()),
            )
    }

    /// The store used while the primary is healthy.
    pub fn primary(&self) -> &Arc<dyn CacheStore> {
        &self.transitions.primary
    }

    /// The store used after a fail-over.
    pub fn fallback(&self) -> &Arc<dyn CacheStore> {
        &self.transitions.fallback
    }
}
