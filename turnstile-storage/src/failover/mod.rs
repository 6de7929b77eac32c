//! Primary/fallback fail-over.
//!
//! [`FailoverCache`] sends every operation to the primary store until one
//! fails, then records the switch in a host-visible [`ModeIndicator`] so all
//! workers move to the fallback store together. While the fallback is in
//! use each operation schedules a [`RecoveryProbe`]; once the primary
//! answers again, both stores are cleared and the indicator removed.
//!
//! Transitions are serialized per host by two independent
//! [`TransitionLock`] names. The indicator read on the request path takes
//! no lock.

pub mod facade;
pub mod indicator;
pub mod lock;
pub mod probe;
pub mod reset;
pub mod stats;
mod transition;

pub use facade::FailoverCache;
pub use indicator::{FileModeIndicator, MemoryModeIndicator, ModeIndicator};
pub use lock::{
    ensure_free, select_lock_provider, FileLock, LocalLock, LockGuard, LockName, TransitionLock,
};
pub use probe::{ProbeOutcome, ProbeScheduler, RecoveryProbe};
pub use reset::{reset_from_config, reset_to_primary};
pub use stats::FailoverStats;
