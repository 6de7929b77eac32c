//! Mode indicator: the host-visible record that the fallback store is active.
//!
//! Absent means the primary is in use, present means the fallback is. Every
//! worker on the host reads the same indicator on every operation, so a
//! fail-over observed by one worker takes effect for all of them.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use turnstile_core::{CoordinationError, CoordinationResult};

/// Storage for the fail-over flag.
pub trait ModeIndicator: Send + Sync + std::fmt::Debug {
    /// Whether the flag is present.
    fn exists(&self) -> CoordinationResult<bool>;

    /// Set the flag. Returns `true` only if this call made it present.
    fn create(&self) -> CoordinationResult<bool>;

    /// Clear the flag. Clearing an absent flag is not an error.
    fn remove(&self) -> CoordinationResult<()>;
}

/// Indicator backed by a marker file, visible to every process on the host.
#[derive(Debug, Clone)]
pub struct FileModeIndicator {
    path: PathBuf,
}

impl FileModeIndicator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, action: &str, e: std::io::Error) -> CoordinationError {
        CoordinationError::Indicator {
            reason: format!("{action} {}: {e}", self.path.display()),
        }
    }
}

impl ModeIndicator for FileModeIndicator {
    fn exists(&self) -> CoordinationResult<bool> {
        self.path
            .try_exists()
            .map_err(|e| self.io_err("stat", e))
    }

    fn create(&self) -> CoordinationResult<bool> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err("create dir for", e))?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.io_err("create", e)),
        }
    }

    fn remove(&self) -> CoordinationResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err("remove", e)),
        }
    }
}

/// Process-local indicator.
#[derive(Debug, Default)]
pub struct MemoryModeIndicator {
    present: AtomicBool,
}

impl MemoryModeIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModeIndicator for MemoryModeIndicator {
    fn exists(&self) -> CoordinationResult<bool> {
        Ok(self.present.load(Ordering::SeqCst))
    }

    fn create(&self) -> CoordinationResult<bool> {
        Ok(!self.present.swap(true, Ordering::SeqCst))
    }

    fn remove(&self) -> CoordinationResult<()> {
        self.present.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_indicator_lifecycle() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let indicator = FileModeIndicator::new(dir.path().join("gw_primary_cache_failed"));

        assert!(!indicator.exists().expect("exists"));
        assert!(indicator.create().expect("create"), "first create is the edge");
        assert!(!indicator.create().expect("create"), "second create is a no-op");
        assert!(indicator.exists().expect("exists"));

        indicator.remove().expect("remove");
        assert!(!indicator.exists().expect("exists"));
        indicator.remove().expect("removing an absent indicator is fine");
    }

    #[test]
    fn test_file_indicator_shared_by_path() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("nested").join("flag");
        let a = FileModeIndicator::new(&path);
        let b = FileModeIndicator::new(&path);

        a.create().expect("create");
        assert!(b.exists().expect("exists"));
        b.remove().expect("remove");
        assert!(!a.exists().expect("exists"));
    }

    #[test]
    fn test_memory_indicator_edge() {
        let indicator = MemoryModeIndicator::new();
        assert!(indicator.create().expect("create"));
        assert!(!indicator.create().expect("create"));
        indicator.remove().expect("remove");
        assert!(!indicator.exists().expect("exists"));
    }
}
