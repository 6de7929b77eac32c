//! Transition counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a facade's transition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailoverStats {
    /// Fail-overs performed by this process (absent to present edges)
    pub failovers: u64,
    /// Fail-backs completed by this process
    pub failbacks: u64,
    /// Recovery probes started
    pub probes_scheduled: u64,
    /// Recovery probes that ran to an outcome
    pub probes_completed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    failovers: AtomicU64,
    failbacks: AtomicU64,
    probes_scheduled: AtomicU64,
    probes_completed: AtomicU64,
}

impl Counters {
    pub(crate) fn failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failback(&self) {
        self.failbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn probe_scheduled(&self) {
        self.probes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn probe_completed(&self) {
        self.probes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> FailoverStats {
        FailoverStats {
            failovers: self.failovers.load(Ordering::Relaxed),
            failbacks: self.failbacks.load(Ordering::Relaxed),
            probes_scheduled: self.probes_scheduled.load(Ordering::Relaxed),
            probes_completed: self.probes_completed.load(Ordering::Relaxed),
        }
    }
}
