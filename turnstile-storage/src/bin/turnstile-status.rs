//! Turnstile cache status
//!
//! Reports which store the workers on this host are using, without
//! touching either store. `--reset` returns every worker to the primary:
//! under the fail-back lock it clears the primary, then the fallback, then
//! removes the mode indicator.

use std::process::ExitCode;

use turnstile_core::{
    init_tracing, CacheRole, FailoverConfig, HealthCheck, LogConfig, TurnstileResult,
};
use turnstile_storage::{
    reset_from_config, select_lock_provider, FileModeIndicator, LockName, ModeIndicator,
    ProbeOutcome,
};

#[tokio::main]
async fn main() -> TurnstileResult<ExitCode> {
    init_tracing(&LogConfig::from_env())?;

    let reset = std::env::args().skip(1).any(|arg| arg == "--reset");
    let config = FailoverConfig::from_env()?;

    let mut code = ExitCode::SUCCESS;
    if reset {
        match reset_from_config(&config).await {
            Ok(ProbeOutcome::Recovered) => {
                tracing::warn!("Both caches cleared, workers resume on primary cache");
            }
            Ok(ProbeOutcome::AlreadyRecovered) => {
                tracing::info!("Already on primary cache, nothing to reset");
            }
            Ok(outcome) => {
                tracing::error!(?outcome, "Reset failed, mode indicator left in place");
                code = ExitCode::FAILURE;
            }
            Err(e) if e.is_expected() => {
                tracing::warn!(error = %e, "Reset skipped, another worker is failing back");
                code = ExitCode::FAILURE;
            }
            Err(e) => {
                tracing::error!(error = %e, "Reset failed");
                code = ExitCode::FAILURE;
            }
        }
    }

    let indicator = FileModeIndicator::new(&config.indicator_path);
    let active = if indicator.exists()? {
        CacheRole::Fallback
    } else {
        CacheRole::Primary
    };

    let locks = select_lock_provider(&config)?;
    let mut report = HealthCheck::for_cache("cache", active)
        .with_metadata("primary", serde_json::json!(config.primary.backend()))
        .with_metadata("fallback", serde_json::json!(config.fallback.backend()))
        .with_metadata(
            "indicator",
            serde_json::json!(indicator.path().display().to_string()),
        )
        .with_metadata("locks", serde_json::json!(locks.backend()));
    for name in [LockName::FailOver, LockName::FailBack] {
        report = report.with_metadata(
            format!("{name}_lock_held"),
            serde_json::json!(locks.is_held(name)?),
        );
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to render status"),
    }
    Ok(code)
}
