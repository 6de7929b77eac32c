//! Error types for Turnstile operations

use std::time::Duration;
use thiserror::Error;

/// Cache store errors.
///
/// `store` carries the label of the store that failed ("primary", "fallback",
/// or a backend name when the store is used standalone).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {store} unreachable: {reason}")]
    Unreachable { store: String, reason: String },

    #[error("Store {store} timed out after {after:?}")]
    Timeout { store: String, after: Duration },

    #[error("Store {store} backend error: {reason}")]
    Backend { store: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl StoreError {
    /// Transport-level failures: the store could not be talked to at all.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }
}

/// Errors from the cross-process coordination primitives (indicator, locks).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Lock {name} is held by another worker")]
    LockBusy { name: String },

    #[error("Lock {name} failed: {reason}")]
    Lock { name: String, reason: String },

    #[error("Mode indicator failed: {reason}")]
    Indicator { reason: String },

    #[error("Coordination state poisoned")]
    Poisoned,
}

impl CoordinationError {
    /// Contention: someone else is handling the transition.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::LockBusy { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Tracing initialization failed: {reason}")]
    Tracing { reason: String },
}

/// OAuth2 token scope errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Scope must not be empty")]
    Empty,

    #[error("Unknown scope {scope:?}, allowed scopes are read and write")]
    Unknown { scope: String },

    #[error("Duplicate scope {scope:?}")]
    Duplicate { scope: String },
}

/// Master error type for all Turnstile errors.
#[derive(Debug, Clone, Error)]
pub enum TurnstileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),
}

impl TurnstileError {
    /// Whether this error is a normal condition of the fail-over protocol
    /// (a store that is still down, a lock someone else holds) rather than
    /// something worth surfacing in logs.
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Coordination(e) => e.is_expected(),
            _ => false,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for coordination primitives.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Result type alias for Turnstile operations.
pub type TurnstileResult<T> = Result<T, TurnstileError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_timeout() {
        let err = StoreError::Timeout {
            store: "primary".to_string(),
            after: Duration::from_millis(250),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("primary"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_store_error_transient_classification() {
        let unreachable = StoreError::Unreachable {
            store: "primary".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(unreachable.is_transient());

        let backend = StoreError::Backend {
            store: "fallback".to_string(),
            reason: "map full".to_string(),
        };
        assert!(!backend.is_transient());

        let serialization = StoreError::Serialization {
            reason: "eof".to_string(),
        };
        assert!(!serialization.is_transient());
    }

    #[test]
    fn test_coordination_error_display_lock_busy() {
        let err = CoordinationError::LockBusy {
            name: "fail-over".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("fail-over"));
        assert!(msg.contains("held by another worker"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "op_timeout".to_string(),
            value: "0".to_string(),
            reason: "must be non-zero".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("op_timeout"));
        assert!(msg.contains("must be non-zero"));
    }

    #[test]
    fn test_turnstile_error_from_variants() {
        let store = TurnstileError::from(StoreError::Serialization {
            reason: "bad".to_string(),
        });
        assert!(matches!(store, TurnstileError::Store(_)));

        let coordination = TurnstileError::from(CoordinationError::Poisoned);
        assert!(matches!(coordination, TurnstileError::Coordination(_)));

        let config = TurnstileError::from(ConfigError::MissingField {
            field: "canary_key".to_string(),
        });
        assert!(matches!(config, TurnstileError::Config(_)));

        let scope = TurnstileError::from(ScopeError::Empty);
        assert!(matches!(scope, TurnstileError::Scope(_)));
    }

    #[test]
    fn test_expected_errors() {
        let down = TurnstileError::from(StoreError::Timeout {
            store: "primary".to_string(),
            after: Duration::from_millis(10),
        });
        assert!(down.is_expected());

        let busy = TurnstileError::from(CoordinationError::LockBusy {
            name: "fail-back".to_string(),
        });
        assert!(busy.is_expected());

        let indicator = TurnstileError::from(CoordinationError::Indicator {
            reason: "permission denied".to_string(),
        });
        assert!(!indicator.is_expected());

        let broken = CoordinationError::Lock {
            name: "fail-back".to_string(),
            reason: "read-only file system".to_string(),
        };
        assert!(!broken.is_expected());
        assert!(!TurnstileError::from(broken).is_expected());
    }
}
