//! Operator-driven return to the primary store.
//!
//! Removing the mode indicator by hand would send every worker back to a
//! primary that still holds entries from before the outage. A reset runs
//! the same sequence as a successful recovery instead: under the
//! fail-back lock, clear the primary, clear the fallback, then remove the
//! indicator. The canary read is skipped.

use std::sync::Arc;

use tracing::info;
use turnstile_core::{FailoverConfig, TurnstileResult};

use super::indicator::{FileModeIndicator, ModeIndicator};
use super::lock::{select_lock_provider, LockGuard, LockName, TransitionLock};
use super::probe::ProbeOutcome;
use super::transition::Transitions;
use crate::cache::{open_store, CacheStore};

/// Fail back now.
///
/// Returns `AlreadyRecovered` when the indicator is absent, `Recovered` on
/// success and `FailBackFailed` when a clear or the removal failed (the
/// indicator is then left in place). A fail-back lock held elsewhere is
/// reported as `CoordinationError::LockBusy`.
pub async fn reset_to_primary(
    primary: Arc<dyn CacheStore>,
    fallback: Arc<dyn CacheStore>,
    indicator: Arc<dyn ModeIndicator>,
    locks: Arc<dyn TransitionLock>,
    config: &FailoverConfig,
) -> TurnstileResult<ProbeOutcome> {
    let transitions = Transitions::new(primary, fallback, indicator, locks, config);
    let guard = LockGuard::acquire(&transitions.locks, LockName::FailBack)?;
    info!("Resetting cache to primary");
    Ok(transitions.fail_back(&guard).await)
}

/// [`reset_to_primary`] against the stores, indicator file and locks
/// described by `config`.
pub async fn reset_from_config(config: &FailoverConfig) -> TurnstileResult<ProbeOutcome> {
    config.validate()?;
    let primary = open_store(&config.primary, config)?;
    let fallback = open_store(&config.fallback, config)?;
    let indicator = Arc::new(FileModeIndicator::new(&config.indicator_path));
    let locks = select_lock_provider(config)?;
    reset_to_primary(primary, fallback, indicator, locks, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KeySpace, MemoryStore};
    use crate::failover::indicator::MemoryModeIndicator;
    use crate::failover::lock::LocalLock;
    use serde_json::json;
    use tempfile::TempDir;
    use turnstile_core::StoreLocation;

    #[tokio::test]
    async fn test_reset_from_config_clears_lmdb_fallback() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = FailoverConfig::new()
            .with_runtime_dir(dir.path())
            .with_stores(
                StoreLocation::Memory,
                StoreLocation::Lmdb {
                    path: dir.path().join("fallback"),
                    max_size_mb: 4,
                },
            );
        let indicator = FileModeIndicator::new(&config.indicator_path);
        indicator.create().expect("create");

        let outcome = reset_from_config(&config).await.expect("reset");

        assert_eq!(outcome, ProbeOutcome::Recovered);
        assert!(!indicator.exists().expect("exists"));
    }

    #[tokio::test]
    async fn test_reset_without_indicator_touches_nothing() {
        let primary = Arc::new(MemoryStore::new(KeySpace::default()));
        primary.set("k", json!(1), None, None).await.expect("set");
        let indicator = Arc::new(MemoryModeIndicator::new());

        let outcome = reset_to_primary(
            primary.clone(),
            Arc::new(MemoryStore::default()),
            indicator,
            Arc::new(LocalLock::new()),
            &FailoverConfig::new(),
        )
        .await
        .expect("reset");

        assert_eq!(outcome, ProbeOutcome::AlreadyRecovered);
        assert_eq!(primary.get("k", None, None).await.expect("get"), Some(json!(1)));
    }
}
