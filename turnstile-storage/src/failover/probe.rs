//! Recovery probe: detects that the primary store is back and fails back.
//!
//! A probe is scheduled by every operation served from the fallback store.
//! It never reports to the operation that scheduled it; its outcome is only
//! logged and counted.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use turnstile_core::CoordinationError;

use super::lock::{ensure_free, LockGuard, LockName};
use super::transition::Transitions;

/// How a probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Another worker holds the fail-back lock
    LockBusy,
    /// The fail-back lock could not be inspected or taken
    LockFailed,
    /// The canary read failed or timed out
    PrimaryDown,
    /// The indicator was already gone once the lock was held
    AlreadyRecovered,
    /// Both stores were cleared and the indicator removed
    Recovered,
    /// A clear or the indicator removal failed; the fallback stays active
    FailBackFailed,
    /// Too many probes were already running
    Throttled,
}

/// One recovery attempt.
#[derive(Debug, Clone)]
pub struct RecoveryProbe {
    transitions: Arc<Transitions>,
}

impl RecoveryProbe {
    pub(crate) fn new(transitions: Arc<Transitions>) -> Self {
        Self { transitions }
    }

    /// Run the probe to completion. Never fails: every error becomes an
    /// outcome.
    pub async fn run(&self) -> ProbeOutcome {
        let t = &self.transitions;

        if let Err(e) = ensure_free(t.locks.as_ref(), LockName::FailBack) {
            return lock_unavailable(e);
        }

        if let Err(e) = t.read_canary().await {
            debug!(error = %e, "Primary cache still unavailable");
            return ProbeOutcome::PrimaryDown;
        }
        debug!("Was able to read primary cache, attempting to fail back");

        match LockGuard::acquire(&t.locks, LockName::FailBack) {
            Ok(guard) => t.fail_back(&guard).await,
            Err(e) => lock_unavailable(e),
        }
    }
}

/// Contention is routine; anything else means the lock itself is broken.
fn lock_unavailable(e: CoordinationError) -> ProbeOutcome {
    if e.is_expected() {
        debug!(error = %e, "Fail-back handled by another worker, skipping probe");
        ProbeOutcome::LockBusy
    } else {
        warn!(error = %e, "Fail-back lock unusable, skipping probe");
        ProbeOutcome::LockFailed
    }
}

/// Spawns one probe task per request, with at most `concurrency` of them
/// doing work at a time.
///
/// A task that finds every permit taken ends at once with
/// [`ProbeOutcome::Throttled`]: the probes already running will observe the
/// same primary state.
#[derive(Debug, Clone)]
pub struct ProbeScheduler {
    permits: Arc<Semaphore>,
}

impl ProbeScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Start `probe` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, probe: RecoveryProbe) -> JoinHandle<ProbeOutcome> {
        let permits = Arc::clone(&self.permits);
        probe.transitions.counters.probe_scheduled();
        tokio::spawn(async move {
            let outcome = match permits.try_acquire_owned() {
                Ok(_permit) => probe.run().await,
                Err(_) => ProbeOutcome::Throttled,
            };
            probe.transitions.counters.probe_completed();
            debug!(?outcome, "Recovery probe finished");
            outcome
        })
    }

    /// Permits not currently held by a running probe.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
