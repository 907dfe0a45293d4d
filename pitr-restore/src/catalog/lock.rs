//! Exclusive lock on the backup catalog.

use crate::utils::errors::{IoContext, RestoreError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE_NAME: &str = "catalog.lock";

/// Held for the whole restore; the lock is dropped with the guard.
#[derive(Debug)]
pub struct CatalogLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl CatalogLock {
    /// Take the lock without waiting. Another holder means another backup or
    /// restore is running.
    pub fn acquire(backup_path: &Path) -> Result<Self> {
        let path = backup_path.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_path("open lock file", &path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = %path.display(), "catalog locked");
                Ok(Self { _lock: lock, path })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(RestoreError::AlreadyRunning),
            Err((_, errno)) => Err(RestoreError::io(
                "lock",
                &path,
                std::io::Error::from_raw_os_error(errno as i32),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "catalog unlocked");
    }
}
