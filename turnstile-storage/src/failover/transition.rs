//! Mode transitions shared by the facade and its recovery probes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use turnstile_core::{CacheRole, FailoverConfig, StoreError, StoreResult};

use super::indicator::ModeIndicator;
use super::lock::{LockGuard, LockName, TransitionLock};
use super::probe::ProbeOutcome;
use super::stats::Counters;
use crate::cache::{CacheOp, CacheReply, CacheStore};

/// Everything a transition touches. One per facade, shared with the probes
/// it spawns.
#[derive(Debug)]
pub(crate) struct Transitions {
    pub(crate) primary: Arc<dyn CacheStore>,
    pub(crate) fallback: Arc<dyn CacheStore>,
    pub(crate) indicator: Arc<dyn ModeIndicator>,
    pub(crate) locks: Arc<dyn TransitionLock>,
    pub(crate) op_timeout: Duration,
    pub(crate) probe_timeout: Duration,
    pub(crate) canary_key: String,
    pub(crate) counters: Counters,
}

impl Transitions {
    pub(crate) fn new(
        primary: Arc<dyn CacheStore>,
        fallback: Arc<dyn CacheStore>,
        indicator: Arc<dyn ModeIndicator>,
        locks: Arc<dyn TransitionLock>,
        config: &FailoverConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            indicator,
            locks,
            op_timeout: config.op_timeout,
            probe_timeout: config.probe_timeout,
            canary_key: config.canary_key.clone(),
            counters: Counters::default(),
        }
    }

    pub(crate) fn store(&self, role: CacheRole) -> &dyn CacheStore {
        match role {
            CacheRole::Primary => self.primary.as_ref(),
            CacheRole::Fallback => self.fallback.as_ref(),
        }
    }

    /// Read the indicator. An unreadable indicator counts as absent so the
    /// primary keeps being tried.
    pub(crate) fn active_mode(&self) -> CacheRole {
        match self.indicator.exists() {
            Ok(true) => CacheRole::Fallback,
            Ok(false) => CacheRole::Primary,
            Err(e) => {
                warn!(error = %e, "Mode indicator unreadable, assuming primary cache");
                CacheRole::Primary
            }
        }
    }

    /// Run `op` against one store, bounded by the operation timeout.
    pub(crate) async fn run(&self, role: CacheRole, op: &CacheOp) -> StoreResult<CacheReply> {
        bounded(role, self.op_timeout, op.apply(self.store(role))).await
    }

    /// Read the canary key from the primary, bounded by the probe timeout.
    pub(crate) async fn read_canary(&self) -> StoreResult<()> {
        let canary = CacheOp::Get {
            key: self.canary_key.clone(),
            default: None,
            version: None,
        };
        bounded(
            CacheRole::Primary,
            self.probe_timeout,
            canary.apply(self.primary.as_ref()),
        )
        .await
        .map(|_| ())
    }

    /// Switch every worker on the host to the fallback store.
    ///
    /// Returns whether this call flipped the indicator. Lock contention and
    /// indicator errors are logged and absorbed; the caller uses the
    /// fallback store either way.
    pub(crate) fn fail_over(&self) -> bool {
        let guard = match LockGuard::acquire(&self.locks, LockName::FailOver) {
            Ok(guard) => guard,
            Err(e) if e.is_expected() => {
                debug!(error = %e, "Skipping fail-over, another worker is handling it");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Could not take fail-over lock, skipping transition");
                return false;
            }
        };

        let flipped = match self.indicator.create() {
            Ok(true) => {
                error!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    "Primary cache unavailable, switching to fallback cache"
                );
                self.counters.failover();
                true
            }
            Ok(false) => {
                debug!("Fallback cache already active");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to record fail-over in mode indicator");
                false
            }
        };

        drop(guard);
        flipped
    }

    /// Return to the primary store. The caller must hold the fail-back lock.
    ///
    /// Clears the primary, then the fallback, then removes the indicator.
    /// Any failure stops the sequence with the indicator still present, so
    /// the next probe starts over.
    pub(crate) async fn fail_back(&self, _lock: &LockGuard) -> ProbeOutcome {
        match self.indicator.exists() {
            Ok(true) => {}
            Ok(false) => {
                debug!("Another worker already failed back");
                return ProbeOutcome::AlreadyRecovered;
            }
            Err(e) => {
                warn!(error = %e, "Mode indicator unreadable during fail-back");
                return ProbeOutcome::FailBackFailed;
            }
        }

        for role in [CacheRole::Primary, CacheRole::Fallback] {
            debug!(store = %role, "Clearing cache for fail-back");
            if let Err(e) = self.run(role, &CacheOp::Clear).await {
                warn!(store = %role, error = %e, "Failed to clear cache during fail-back");
                return ProbeOutcome::FailBackFailed;
            }
        }

        if let Err(e) = self.indicator.remove() {
            warn!(error = %e, "Failed to remove mode indicator during fail-back");
            return ProbeOutcome::FailBackFailed;
        }

        warn!("Primary cache recovered, cleared both caches and resumed using primary");
        self.counters.failback();
        ProbeOutcome::Recovered
    }
}

/// Bound a store call; running out of time is reported as a store timeout.
async fn bounded<T, F>(role: CacheRole, after: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            store: role.as_str().to_string(),
            after,
        }),
    }
}
