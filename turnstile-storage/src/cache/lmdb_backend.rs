//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a host-local,
//! memory-mapped key-value store. Every process on the host that opens the
//! same directory sees the same entries, which makes it a good fallback for
//! a networked primary.
//!
//! # Value Layout
//!
//! `[deadline: 8 bytes little-endian millis][json value]`, where a deadline
//! of `i64::MAX` means the entry never expires.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`
//! - Write transactions for `add`, `set`, `delete` and `clear`
//! - `clear` only touches keys under the store's prefix, unless the prefix
//!   is empty
//! - Statistics are tracked behind an `RwLock`

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use turnstile_core::{CacheValue, StoreError, StoreResult};

use super::expiry::{self, now_millis};
use super::key::KeySpace;
use super::traits::{CacheStore, StoreStats};

/// Length of the deadline header in front of every value.
const HEADER_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes do not follow the value layout.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) | LmdbStoreError::Corrupt(reason) => {
                StoreError::Serialization { reason }
            }
            other => StoreError::Backend {
                store: "lmdb".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// let store = LmdbStore::new("/var/cache/turnstile", 64, KeySpace::new("gw", 1))?;
/// store.set("session", json!({"sub": "alice"}), None, None).await?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    keys: KeySpace,
    stats: Arc<RwLock<StoreStats>>,
}

impl LmdbStore {
    /// Open (or create) an LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `keys` - Key prefix and default version
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        keys: KeySpace,
    ) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path per process and
        // never memory-mapped by other code in this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            keys,
            stats: Arc::default(),
        })
    }

    fn encode_entry(value: &CacheValue, deadline: i64) -> Result<Vec<u8>, LmdbStoreError> {
        let value_bytes =
            serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + value_bytes.len());
        bytes.extend_from_slice(&deadline.to_le_bytes());
        bytes.extend_from_slice(&value_bytes);
        Ok(bytes)
    }

    fn decode_deadline(bytes: &[u8]) -> Result<i64, LmdbStoreError> {
        let header: [u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| LmdbStoreError::Corrupt("entry shorter than header".into()))?;
        Ok(i64::from_le_bytes(header))
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }
}

#[async_trait]
impl CacheStore for LmdbStore {
    async fn add(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<bool> {
        let key = self.keys.key(key, version).encode();
        let now = now_millis();
        let bytes = Self::encode_entry(&value, expiry::deadline_from(now, ttl))?;

        // Check and insert in one write transaction so concurrent adds from
        // other processes cannot both succeed.
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let live = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(existing) => !expiry::is_expired(Self::decode_deadline(existing)?, now),
            None => false,
        };
        if live {
            return Ok(false);
        }
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn get(
        &self,
        key: &str,
        default: Option<CacheValue>,
        version: Option<i64>,
    ) -> StoreResult<Option<CacheValue>> {
        let key = self.keys.key(key, version).encode();
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let Some(bytes) = self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? else {
            self.record(false);
            return Ok(default);
        };

        if expiry::is_expired(Self::decode_deadline(bytes)?, now_millis()) {
            self.record(false);
            return Ok(default);
        }

        let value: CacheValue = serde_json::from_slice(&bytes[HEADER_LEN..])
            .map_err(|e| LmdbStoreError::Corrupt(e.to_string()))?;
        self.record(true);
        Ok(Some(value))
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    ) -> StoreResult<()> {
        let key = self.keys.key(key, version).encode();
        let bytes = Self::encode_entry(&value, expiry::deadline(ttl))?;
        self.write(&key, &bytes)?;
        Ok(())
    }

    async fn delete(&self, key: &str, version: Option<i64>) -> StoreResult<()> {
        let key = self.keys.key(key, version).encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Without a prefix the whole database is emptied. With one, only keys
    /// under the prefix are removed, so stores sharing an environment
    /// directory keep each other's entries.
    async fn clear(&self) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        if self.keys.prefix().is_empty() {
            self.db.clear(&mut wtxn).map_err(txn_err)?;
        } else {
            let namespace = self.keys.namespace();
            let doomed = self
                .db
                .prefix_iter(&wtxn, namespace.as_bytes())
                .map_err(txn_err)?
                .map(|entry| entry.map(|(key, _)| key.to_vec()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(txn_err)?;
            for key in &doomed {
                self.db.delete(&mut wtxn, key).map_err(txn_err)?;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "lmdb"
    }

    fn stats(&self) -> StoreStats {
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        if let Ok(rtxn) = self.env.read_txn() {
            stats.entry_count = self.db.len(&rtxn).unwrap_or(0);
        }
        stats
    }
}
