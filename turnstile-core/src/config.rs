//! Fail-over cache configuration
//!
//! Loaded from `TURNSTILE_*` environment variables with defaults suitable
//! for a single host running several worker processes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ConfigError;

/// File name of the fail-over marker inside the temp directory.
pub const DEFAULT_INDICATOR_FILE: &str = "gw_primary_cache_failed";

/// Key read from the primary store to decide whether it has recovered.
pub const DEFAULT_CANARY_KEY: &str = "up_test";

/// Default LMDB map size when a location does not specify one.
pub const DEFAULT_LMDB_SIZE_MB: usize = 64;

// ============================================================================
// STORE LOCATION
// ============================================================================

/// Where a cache store lives.
///
/// Parsed from strings of the form:
/// - `memory`
/// - `lmdb:///var/cache/turnstile?max_size_mb=128`
/// - `redis://127.0.0.1:6379/0` (also `rediss://`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Process-local map
    Memory,
    /// Host-local LMDB environment
    Lmdb { path: PathBuf, max_size_mb: usize },
    /// Redis server, connection URL kept verbatim
    Redis { url: String },
}

impl StoreLocation {
    /// Short backend label used in logs.
    pub fn backend(&self) -> &'static str {
        match self {
            StoreLocation::Memory => "memory",
            StoreLocation::Lmdb { .. } => "lmdb",
            StoreLocation::Redis { .. } => "redis",
        }
    }
}

impl FromStr for StoreLocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("memory") {
            return Ok(StoreLocation::Memory);
        }
        if s.starts_with("redis://") || s.starts_with("rediss://") {
            return Ok(StoreLocation::Redis { url: s.to_string() });
        }
        if let Some(rest) = s.strip_prefix("lmdb://") {
            let (path, query) = match rest.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (rest, None),
            };
            if path.is_empty() {
                return Err(invalid("store location", s, "lmdb location needs a path"));
            }
            let mut max_size_mb = DEFAULT_LMDB_SIZE_MB;
            for pair in query.into_iter().flat_map(|q| q.split('&')) {
                match pair.split_once('=') {
                    Some(("max_size_mb", value)) => {
                        max_size_mb = value.parse().map_err(|_| {
                            invalid("max_size_mb", value, "must be a positive integer")
                        })?;
                    }
                    _ => return Err(invalid("store location", s, "unknown lmdb option")),
                }
            }
            return Ok(StoreLocation::Lmdb {
                path: PathBuf::from(path),
                max_size_mb,
            });
        }
        Err(invalid(
            "store location",
            s,
            "expected memory, lmdb://<path> or redis://<host>",
        ))
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::Memory => f.write_str("memory"),
            StoreLocation::Lmdb { path, max_size_mb } => {
                write!(f, "lmdb://{}?max_size_mb={}", path.display(), max_size_mb)
            }
            StoreLocation::Redis { url } => f.write_str(url),
        }
    }
}

// ============================================================================
// LOCK BACKEND
// ============================================================================

/// Which transition lock implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockBackend {
    /// Use host-wide file locks when the lock directory is usable,
    /// otherwise process-local locks
    #[default]
    Auto,
    /// Host-wide lock files
    File,
    /// Process-local locks
    Local,
}

impl FromStr for LockBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(LockBackend::Auto),
            "file" => Ok(LockBackend::File),
            "local" => Ok(LockBackend::Local),
            _ => Err(invalid("lock_backend", s, "expected auto, file or local")),
        }
    }
}

// ============================================================================
// FAILOVER CONFIG
// ============================================================================

/// Configuration for a fail-over cache facade.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    /// Prefix prepended to every cache key.
    pub key_prefix: String,
    /// Key version used when a call does not pass one.
    pub default_version: i64,
    /// Upper bound on a single store operation in the request path.
    pub op_timeout: Duration,
    /// Upper bound on the recovery probe's canary read.
    pub probe_timeout: Duration,
    /// A transition lock older than this is considered abandoned.
    pub lock_lease: Duration,
    /// Maximum number of recovery probes running at once in this process.
    pub probe_concurrency: usize,
    /// Key read from the primary store by the recovery probe.
    pub canary_key: String,
    /// Marker file recording that the fallback store is active.
    pub indicator_path: PathBuf,
    /// Directory holding the transition lock files.
    pub lock_dir: PathBuf,
    /// Transition lock implementation.
    pub lock_backend: LockBackend,
    /// Primary store location.
    pub primary: StoreLocation,
    /// Fallback store location.
    pub fallback: StoreLocation,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            key_prefix: String::new(),
            default_version: 1,
            op_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(250),
            lock_lease: Duration::from_secs(30),
            probe_concurrency: 4,
            canary_key: DEFAULT_CANARY_KEY.to_string(),
            indicator_path: tmp.join(DEFAULT_INDICATOR_FILE),
            lock_dir: tmp,
            lock_backend: LockBackend::Auto,
            primary: StoreLocation::Memory,
            fallback: StoreLocation::Memory,
        }
    }
}

impl FailoverConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create FailoverConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TURNSTILE_KEY_PREFIX`: Prefix for every key (default: empty)
    /// - `TURNSTILE_DEFAULT_VERSION`: Key version when none is given (default: 1)
    /// - `TURNSTILE_OP_TIMEOUT_MS`: Store operation timeout (default: 500)
    /// - `TURNSTILE_PROBE_TIMEOUT_MS`: Canary read timeout (default: 250)
    /// - `TURNSTILE_LOCK_LEASE_SECS`: Abandoned lock threshold (default: 30)
    /// - `TURNSTILE_PROBE_CONCURRENCY`: Concurrent recovery probes (default: 4)
    /// - `TURNSTILE_CANARY_KEY`: Probe key (default: up_test)
    /// - `TURNSTILE_INDICATOR_PATH`: Fail-over marker file
    /// - `TURNSTILE_LOCK_DIR`: Directory for lock files
    /// - `TURNSTILE_LOCK_BACKEND`: auto, file or local (default: auto)
    /// - `TURNSTILE_PRIMARY` / `TURNSTILE_FALLBACK`: store locations (default: memory)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let config = Self {
            key_prefix: lookup("TURNSTILE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_version: parse_or("TURNSTILE_DEFAULT_VERSION", get, defaults.default_version)?,
            op_timeout: get("TURNSTILE_OP_TIMEOUT_MS")
                .map(|v| parse_var::<u64>("TURNSTILE_OP_TIMEOUT_MS", &v))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.op_timeout),
            probe_timeout: get("TURNSTILE_PROBE_TIMEOUT_MS")
                .map(|v| parse_var::<u64>("TURNSTILE_PROBE_TIMEOUT_MS", &v))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
            lock_lease: get("TURNSTILE_LOCK_LEASE_SECS")
                .map(|v| parse_var::<u64>("TURNSTILE_LOCK_LEASE_SECS", &v))
                .transpose()?
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_lease),
            probe_concurrency: parse_or(
                "TURNSTILE_PROBE_CONCURRENCY",
                get,
                defaults.probe_concurrency,
            )?,
            canary_key: get("TURNSTILE_CANARY_KEY").unwrap_or(defaults.canary_key),
            indicator_path: get("TURNSTILE_INDICATOR_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.indicator_path),
            lock_dir: get("TURNSTILE_LOCK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.lock_dir),
            lock_backend: parse_or("TURNSTILE_LOCK_BACKEND", get, defaults.lock_backend)?,
            primary: parse_or("TURNSTILE_PRIMARY", get, defaults.primary)?,
            fallback: parse_or("TURNSTILE_FALLBACK", get, defaults.fallback)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the facade relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.op_timeout.is_zero() {
            return Err(invalid("op_timeout", "0", "must be non-zero"));
        }
        if self.probe_timeout.is_zero() {
            return Err(invalid("probe_timeout", "0", "must be non-zero"));
        }
        if self.lock_lease.is_zero() {
            return Err(invalid("lock_lease", "0", "must be non-zero"));
        }
        if self.probe_concurrency == 0 {
            return Err(invalid("probe_concurrency", "0", "must be at least 1"));
        }
        if self.canary_key.is_empty() {
            return Err(ConfigError::MissingField {
                field: "canary_key".to_string(),
            });
        }
        if let (
            StoreLocation::Lmdb { path: primary, .. },
            StoreLocation::Lmdb { path: fallback, .. },
        ) = (&self.primary, &self.fallback)
        {
            if primary == fallback {
                return Err(ConfigError::IncompatibleOptions {
                    option_a: format!("primary={}", primary.display()),
                    option_b: format!("fallback={}", fallback.display()),
                });
            }
        }
        Ok(())
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the store operation timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the lock lease.
    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Set the probe concurrency.
    pub fn with_probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = concurrency;
        self
    }

    /// Place the indicator file and lock files under `dir`.
    pub fn with_runtime_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.indicator_path = dir.as_ref().join(DEFAULT_INDICATOR_FILE);
        self.lock_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the lock backend.
    pub fn with_lock_backend(mut self, backend: LockBackend) -> Self {
        self.lock_backend = backend;
        self
    }

    /// Set both store locations.
    pub fn with_stores(mut self, primary: StoreLocation, fallback: StoreLocation) -> Self {
        self.primary = primary;
        self.fallback = fallback;
        self
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "could not be parsed"))
}

fn parse_or<T, F>(name: &str, get: F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(value) => parse_var(name, &value),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FailoverConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config.default_version, 1);
        assert_eq!(config.canary_key, "up_test");
        assert_eq!(config.lock_backend, LockBackend::Auto);
        assert!(config.indicator_path.ends_with(DEFAULT_INDICATOR_FILE));
        assert_eq!(config.primary, StoreLocation::Memory);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = FailoverConfig::from_lookup(lookup(&[
            ("TURNSTILE_KEY_PREFIX", "gw"),
            ("TURNSTILE_OP_TIMEOUT_MS", "150"),
            ("TURNSTILE_PROBE_CONCURRENCY", "2"),
            ("TURNSTILE_LOCK_BACKEND", "FILE"),
            ("TURNSTILE_PRIMARY", "redis://cache:6379/1"),
            ("TURNSTILE_FALLBACK", "lmdb:///var/cache/gw?max_size_mb=16"),
        ]))
        .expect("config should parse");

        assert_eq!(config.key_prefix, "gw");
        assert_eq!(config.op_timeout, Duration::from_millis(150));
        assert_eq!(config.probe_concurrency, 2);
        assert_eq!(config.lock_backend, LockBackend::File);
        assert_eq!(
            config.primary,
            StoreLocation::Redis {
                url: "redis://cache:6379/1".to_string()
            }
        );
        assert_eq!(
            config.fallback,
            StoreLocation::Lmdb {
                path: PathBuf::from("/var/cache/gw"),
                max_size_mb: 16
            }
        );
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = FailoverConfig::from_lookup(lookup(&[("TURNSTILE_OP_TIMEOUT_MS", "soon")]))
            .expect_err("non-numeric timeout must fail");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = FailoverConfig::from_lookup(lookup(&[("TURNSTILE_PROBE_TIMEOUT_MS", "0")]))
            .expect_err("zero timeout must fail");
        assert!(err.to_string().contains("probe_timeout"));
    }

    #[test]
    fn test_same_lmdb_path_is_rejected() {
        let config = FailoverConfig::new().with_stores(
            "lmdb:///tmp/gw".parse().expect("valid"),
            "lmdb:///tmp/gw".parse().expect("valid"),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));
    }

    #[test]
    fn test_store_location_parse_and_display() {
        let lmdb: StoreLocation = "lmdb:///data/cache".parse().expect("valid");
        assert_eq!(lmdb.backend(), "lmdb");
        assert_eq!(lmdb.to_string(), "lmdb:///data/cache?max_size_mb=64");

        assert!("lmdb://".parse::<StoreLocation>().is_err());
        assert!("lmdb:///x?compress=yes".parse::<StoreLocation>().is_err());
        assert!("memcached://localhost".parse::<StoreLocation>().is_err());
        assert_eq!(
            "MEMORY".parse::<StoreLocation>().expect("valid"),
            StoreLocation::Memory
        );
    }

    #[test]
    fn test_runtime_dir_builder() {
        let config = FailoverConfig::new().with_runtime_dir("/run/gw");
        assert_eq!(
            config.indicator_path,
            PathBuf::from("/run/gw").join(DEFAULT_INDICATOR_FILE)
        );
        assert_eq!(config.lock_dir, PathBuf::from("/run/gw"));
    }
}
