//! Cross-process advisory locks
//!
//! A lock on `path` is the sibling file `<path>.lock`, created exclusively.
//! Waiters poll until the file disappears or the deadline passes. Dropping
//! the async acquisition cancels the wait.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::ArmError;

/// Default acquisition deadline
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between acquisition attempts
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Lock keyed on `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut name: OsString = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("arm"));
        name.push(".lock");

        Self {
            lock_path: path.with_file_name(name),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Acquire with the default 10 second deadline
    pub async fn lock(&self) -> Result<LockGuard> {
        self.lock_with_timeout(DEFAULT_LOCK_TIMEOUT).await
    }

    pub async fn lock_with_timeout(&self, timeout: Duration) -> Result<LockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create lock directory: {}", parent.display())
                })?;
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => {
                    tracing::trace!("Acquired lock {}", self.lock_path.display());
                    return Ok(LockGuard {
                        lock_path: self.lock_path.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        anyhow::bail!(ArmError::LockTimeout {
                            path: self.lock_path.clone(),
                            timeout,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create lock file: {}", self.lock_path.display())
                    })
                }
            }
        }
    }

    /// Remove the lock file; a missing lock is not an error
    pub fn unlock(&self) -> Result<()> {
        remove_lock_file(&self.lock_path)
    }
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Release explicitly, surfacing any removal error
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_lock_file(&self.lock_path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_lock_file(&self.lock_path) {
                tracing::warn!("Failed to release lock: {}", e);
            }
        }
    }
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::trace!("Released lock {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove lock file: {}", path.display())),
    }
}
