//! Transition locks.
//!
//! Two named locks guard the two mode transitions: [`LockName::FailOver`]
//! and [`LockName::FailBack`]. They are independent, so a fail-over is never
//! blocked by a fail-back in progress and vice versa.
//!
//! Acquisition never blocks. A lock that is already held means another
//! worker is handling the transition, and the caller simply moves on.
//!
//! Implementations:
//! - [`FileLock`]: lock files in a shared directory, visible to every
//!   process on the host. Each lock carries its owner and acquisition time;
//!   a lock older than the lease is treated as abandoned and broken.
//! - [`LocalLock`]: in-process only, for single-process runtimes.
//!
//! [`select_lock_provider`] picks one at start-up.

use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use turnstile_core::{CoordinationError, CoordinationResult, FailoverConfig, LockBackend};
use uuid::Uuid;

/// The two transition locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    FailOver,
    FailBack,
}

impl LockName {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::FailOver => "fail-over",
            LockName::FailBack => "fail-back",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            LockName::FailOver => "gw_cache_fail_over.lock",
            LockName::FailBack => "gw_cache_fail_back.lock",
        }
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-blocking named mutual exclusion.
pub trait TransitionLock: Send + Sync + fmt::Debug {
    /// Label used in logs ("file", "local").
    fn backend(&self) -> &'static str;

    /// Take `name` if nobody holds it. Returns whether it was taken.
    fn try_acquire(&self, name: LockName) -> CoordinationResult<bool>;

    /// Give `name` back. Releasing a lock this provider does not hold is a
    /// no-op.
    fn release(&self, name: LockName) -> CoordinationResult<()>;

    /// Whether anyone currently holds `name`.
    fn is_held(&self, name: LockName) -> CoordinationResult<bool>;
}

/// A held transition lock, released on drop.
pub struct LockGuard {
    lock: Arc<dyn TransitionLock>,
    name: LockName,
}

impl LockGuard {
    /// Take `name`, or fail with [`CoordinationError::LockBusy`] when
    /// someone else holds it.
    pub fn acquire(lock: &Arc<dyn TransitionLock>, name: LockName) -> CoordinationResult<Self> {
        if !lock.try_acquire(name)? {
            return Err(CoordinationError::LockBusy {
                name: name.to_string(),
            });
        }
        Ok(Self {
            lock: Arc::clone(lock),
            name,
        })
    }

    pub fn name(&self) -> LockName {
        self.name
    }
}

/// Fail with [`CoordinationError::LockBusy`] if anyone holds `name`.
pub fn ensure_free(lock: &dyn TransitionLock, name: LockName) -> CoordinationResult<()> {
    if lock.is_held(name)? {
        return Err(CoordinationError::LockBusy {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(self.name) {
            warn!(lock = %self.name, error = %e, "Failed to release transition lock");
        }
    }
}

// ============================================================================
// FILE LOCK
// ============================================================================

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockRecord {
    owner: Uuid,
    acquired_at: DateTime<Utc>,
}

/// Host-wide lock files.
///
/// Each `FileLock` has its own owner id, so two providers pointed at the
/// same directory exclude each other exactly as two processes would.
#[derive(Debug)]
pub struct FileLock {
    dir: PathBuf,
    lease: Duration,
    owner: Uuid,
}

impl FileLock {
    /// Create a provider using lock files in `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>, lease: Duration) -> CoordinationResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CoordinationError::Lock {
            name: "file".to_string(),
            reason: format!("create {}: {e}", dir.display()),
        })?;
        Ok(Self {
            dir,
            lease,
            owner: Uuid::now_v7(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: LockName) -> PathBuf {
        self.dir.join(name.file_name())
    }

    fn lock_err(name: LockName, e: impl fmt::Display) -> CoordinationError {
        CoordinationError::Lock {
            name: name.to_string(),
            reason: e.to_string(),
        }
    }

    /// Read the current record. `Ok(None)` when no lock file exists.
    fn read(&self, name: LockName) -> CoordinationResult<Option<LockRecord>> {
        Self::read_at(&self.path(name)).map_err(|e| Self::lock_err(name, e))
    }

    /// A file that cannot be parsed (for example, one whose writer crashed
    /// half way) is reported with its modification time as acquisition time
    /// and a nil owner.
    fn read_at(path: &Path) -> std::io::Result<Option<LockRecord>> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if let Ok(record) = serde_json::from_slice::<LockRecord>(&contents) {
            return Ok(Some(record));
        }
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Some(LockRecord {
            owner: Uuid::nil(),
            acquired_at: modified,
        }))
    }

    fn is_stale(&self, record: &LockRecord) -> bool {
        let age = Utc::now().signed_duration_since(record.acquired_at);
        age.to_std().map(|age| age > self.lease).unwrap_or(false)
    }

    fn create(&self, name: LockName) -> CoordinationResult<bool> {
        let path = self.path(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Self::lock_err(name, e)),
        };
        let record = LockRecord {
            owner: self.owner,
            acquired_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| Self::lock_err(name, e))?;
        if let Err(e) = file.write_all(&bytes) {
            // Do not leave an ownerless lock behind
            let _ = std::fs::remove_file(&path);
            return Err(Self::lock_err(name, e));
        }
        Ok(true)
    }
}

impl FileLock {
    /// Replace the abandoned lock `stale` with one of our own.
    ///
    /// The lock file is first renamed to a name only this owner uses. If the
    /// moved file turns out not to be `stale` (another worker broke it and
    /// took the lock in the meantime) it is linked back into place and the
    /// lock is reported busy.
    fn break_stale(&self, name: LockName, stale: &LockRecord) -> CoordinationResult<bool> {
        let claim = self
            .dir
            .join(format!("{}.{}.broken", name.file_name(), self.owner));
        match std::fs::rename(self.path(name), &claim) {
            Ok(()) => {}
            // Someone else got there first
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Self::lock_err(name, e)),
        }

        let claimed = Self::read_at(&claim).map_err(|e| Self::lock_err(name, e))?;
        if claimed.as_ref() != Some(stale) {
            debug!(lock = %name, "Lock was renewed while breaking it, restoring");
            let restored = std::fs::hard_link(&claim, self.path(name));
            let _ = std::fs::remove_file(&claim);
            return match restored {
                Ok(()) => Ok(false),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(Self::lock_err(name, e)),
            };
        }

        warn!(
            lock = %name,
            owner = %stale.owner,
            acquired_at = %stale.acquired_at,
            "Breaking abandoned transition lock"
        );
        std::fs::remove_file(&claim).map_err(|e| Self::lock_err(name, e))?;
        self.create(name)
    }
}

impl TransitionLock for FileLock {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn try_acquire(&self, name: LockName) -> CoordinationResult<bool> {
        if self.create(name)? {
            return Ok(true);
        }
        match self.read(name)? {
            // Released between our attempt and the read
            None => self.create(name),
            Some(record) if self.is_stale(&record) => self.break_stale(name, &record),
            Some(_) => Ok(false),
        }
    }

    fn release(&self, name: LockName) -> CoordinationResult<()> {
        match self.read(name)? {
            Some(record) if record.owner == self.owner => {
                match std::fs::remove_file(self.path(name)) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(Self::lock_err(name, e)),
                }
            }
            Some(record) => {
                debug!(lock = %name, owner = %record.owner, "Not releasing lock held by another owner");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn is_held(&self, name: LockName) -> CoordinationResult<bool> {
        Ok(self
            .read(name)?
            .is_some_and(|record| !self.is_stale(&record)))
    }
}

// ============================================================================
// LOCAL LOCK
// ============================================================================

/// Process-local transition locks.
#[derive(Debug, Default)]
pub struct LocalLock {
    held: Mutex<HashSet<LockName>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransitionLock for LocalLock {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn try_acquire(&self, name: LockName) -> CoordinationResult<bool> {
        let mut held = self.held.lock().map_err(|_| CoordinationError::Poisoned)?;
        Ok(held.insert(name))
    }

    fn release(&self, name: LockName) -> CoordinationResult<()> {
        let mut held = self.held.lock().map_err(|_| CoordinationError::Poisoned)?;
        held.remove(&name);
        Ok(())
    }

    fn is_held(&self, name: LockName) -> CoordinationResult<bool> {
        let held = self.held.lock().map_err(|_| CoordinationError::Poisoned)?;
        Ok(held.contains(&name))
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Pick the lock implementation for this process.
///
/// `Auto` uses file locks when the lock directory can be created and written
/// to, and falls back to local locks otherwise.
pub fn select_lock_provider(
    config: &FailoverConfig,
) -> CoordinationResult<Arc<dyn TransitionLock>> {
    match config.lock_backend {
        LockBackend::Local => Ok(Arc::new(LocalLock::new())),
        LockBackend::File => Ok(Arc::new(FileLock::new(&config.lock_dir, config.lock_lease)?)),
        LockBackend::Auto => match FileLock::new(&config.lock_dir, config.lock_lease)
            .and_then(|lock| probe_writable(&lock).map(|()| lock))
        {
            Ok(lock) => {
                debug!(dir = %lock.dir().display(), "Using host-wide file locks");
                Ok(Arc::new(lock))
            }
            Err(e) => {
                warn!(
                    dir = %config.lock_dir.display(),
                    error = %e,
                    "Lock directory unusable, transitions are only coordinated within this process"
                );
                Ok(Arc::new(LocalLock::new()))
            }
        },
    }
}

fn probe_writable(lock: &FileLock) -> CoordinationResult<()> {
    let probe = lock.dir().join(format!(".turnstile-probe-{}", lock.owner));
    std::fs::write(&probe, b"").map_err(|e| CoordinationError::Lock {
        name: "file".to_string(),
        reason: format!("{} not writable: {e}", lock.dir().display()),
    })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_lock(dir: &TempDir) -> FileLock {
        FileLock::new(dir.path(), Duration::from_secs(30)).expect("lock dir")
    }

    #[test]
    fn test_file_lock_excludes_other_owner() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let a = file_lock(&dir);
        let b = file_lock(&dir);

        assert!(a.try_acquire(LockName::FailOver).expect("acquire"));
        assert!(!b.try_acquire(LockName::FailOver).expect("acquire"));
        assert!(b.is_held(LockName::FailOver).expect("is_held"));

        // Names are independent
        assert!(b.try_acquire(LockName::FailBack).expect("acquire"));

        a.release(LockName::FailOver).expect("release");
        assert!(b.try_acquire(LockName::FailOver).expect("acquire"));
    }

    #[test]
    fn test_file_lock_release_checks_owner() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let a = file_lock(&dir);
        let b = file_lock(&dir);

        assert!(a.try_acquire(LockName::FailBack).expect("acquire"));
        b.release(LockName::FailBack).expect("release is a no-op");
        assert!(a.is_held(LockName::FailBack).expect("is_held"));
    }

    #[test]
    fn test_file_lock_breaks_stale_lock() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let abandoned = LockRecord {
            owner: Uuid::now_v7(),
            acquired_at: Utc::now() - chrono::Duration::minutes(5),
        };
        std::fs::write(
            dir.path().join(LockName::FailOver.file_name()),
            serde_json::to_vec(&abandoned).expect("serialize"),
        )
        .expect("write lock file");

        let lock = file_lock(&dir);
        assert!(!lock.is_held(LockName::FailOver).expect("is_held"));
        assert!(lock.try_acquire(LockName::FailOver).expect("acquire"));
    }

    #[test]
    fn test_file_lock_treats_garbage_as_fresh_until_lease() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        std::fs::write(dir.path().join(LockName::FailOver.file_name()), b"{").expect("write");

        let lock = file_lock(&dir);
        assert!(lock.is_held(LockName::FailOver).expect("is_held"));
        assert!(!lock.try_acquire(LockName::FailOver).expect("acquire"));
    }

    #[test]
    fn test_local_lock() {
        let lock = LocalLock::new();
        assert!(lock.try_acquire(LockName::FailOver).expect("acquire"));
        assert!(!lock.try_acquire(LockName::FailOver).expect("acquire"));
        assert!(!lock.is_held(LockName::FailBack).expect("is_held"));
        lock.release(LockName::FailOver).expect("release");
        assert!(!lock.is_held(LockName::FailOver).expect("is_held"));
    }

    #[test]
    fn test_stale_lock_is_broken_only_once() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let stale = LockRecord {
            owner: Uuid::now_v7(),
            acquired_at: Utc::now() - chrono::Duration::minutes(5),
        };
        std::fs::write(
            dir.path().join(LockName::FailBack.file_name()),
            serde_json::to_vec(&stale).expect("serialize"),
        )
        .expect("write lock file");
        let a = file_lock(&dir);
        let b = file_lock(&dir);

        // Both saw the same abandoned record; a breaks it first.
        assert!(a.try_acquire(LockName::FailBack).expect("acquire"));
        assert!(!b.break_stale(LockName::FailBack, &stale).expect("break"));

        assert_eq!(
            a.read(LockName::FailBack).expect("read").map(|r| r.owner),
            Some(a.owner)
        );
        assert!(!b.try_acquire(LockName::FailBack).expect("acquire"));
        let leftovers = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".broken"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock: Arc<dyn TransitionLock> = Arc::new(LocalLock::new());
        {
            let guard = LockGuard::acquire(&lock, LockName::FailBack).expect("free");
            assert_eq!(guard.name(), LockName::FailBack);
            let busy = LockGuard::acquire(&lock, LockName::FailBack).expect_err("held");
            assert!(busy.is_expected());
            assert!(ensure_free(lock.as_ref(), LockName::FailBack).is_err());
        }
        assert!(!lock.is_held(LockName::FailBack).expect("is_held"));
        ensure_free(lock.as_ref(), LockName::FailBack).expect("released");
    }

    #[test]
    fn test_select_lock_provider() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = FailoverConfig::new().with_runtime_dir(dir.path());

        let auto = select_lock_provider(&config).expect("auto");
        assert_eq!(auto.backend(), "file");

        let local = select_lock_provider(&config.clone().with_lock_backend(LockBackend::Local))
            .expect("local");
        assert_eq!(local.backend(), "local");

        // A regular file where the directory should be
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").expect("write");
        let mut unusable = config.with_lock_backend(LockBackend::Auto);
        unusable.lock_dir = blocker.join("locks");
        let fallback = select_lock_provider(&unusable).expect("auto degrades");
        assert_eq!(fallback.backend(), "local");

        unusable.lock_backend = LockBackend::File;
        assert!(select_lock_provider(&unusable).is_err());
    }
}
