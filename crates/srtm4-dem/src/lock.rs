//! Advisory file locks shared between processes.
//!
//! Each lock is an exclusive OS lock (`flock` on Unix, `LockFileEx` on
//! Windows) on a small file in the cache directory. The lock is held for the
//! lifetime of the returned [`FileLockGuard`] and released on drop, so every
//! exit path (including `?` and panics) unlocks it.

use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

/// A named lock file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Lock backed by the file at `path`. The file is created on first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> Result<FileLockGuard> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;
        trace!(lock = %self.path.display(), "acquired");
        Ok(FileLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Acquire and immediately release the lock.
    ///
    /// Used to wait for the current holder to finish.
    pub fn rendezvous(&self) -> Result<()> {
        let guard = self.acquire()?;
        drop(guard);
        Ok(())
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        trace!(lock = %self.path.display(), "released");
    }
}
