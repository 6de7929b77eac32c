//! Turnstile Core - Shared Types
//!
//! Error taxonomy, configuration, cache roles and health reporting used by
//! every other Turnstile crate. No I/O happens here beyond reading
//! environment variables and installing the tracing subscriber.

pub mod config;
pub mod error;
pub mod health;
pub mod oauth;
pub mod role;
pub mod telemetry;

pub use config::{
    FailoverConfig, LockBackend, StoreLocation, DEFAULT_CANARY_KEY, DEFAULT_INDICATOR_FILE,
    DEFAULT_LMDB_SIZE_MB,
};
pub use error::{
    ConfigError, CoordinationError, CoordinationResult, ScopeError, StoreError, StoreResult,
    TurnstileError, TurnstileResult,
};
pub use health::{HealthCheck, HealthStatus};
pub use oauth::{access_token_expiry, Scope, TokenScope, TokenVisibility, MASKED_TOKEN};
pub use role::{CacheRole, CacheRoleParseError};
pub use telemetry::{init_tracing, LogConfig, LogFormat};

/// Cached value type. Stores persist values as JSON.
pub type CacheValue = serde_json::Value;
