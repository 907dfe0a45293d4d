//! Detecting a running server through `postmaster.pid`.

use crate::utils::errors::{RestoreError, Result};
use nix::sys::signal::kill;
use nix::unistd::{getpid, getppid, Pid};
use std::path::Path;
use tracing::debug;

pub const PID_FILE_NAME: &str = "postmaster.pid";

/// PID recorded in the data directory's lock file, if there is one.
/// Standalone backends write their PID negated; the sign is dropped here.
pub fn read_pid(pgdata: &Path) -> Result<Option<i64>> {
    let path = pgdata.join(PID_FILE_NAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RestoreError::io("open PID file", &path, e)),
    };

    let pid: i64 = content
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| RestoreError::PidFileBroken(path.clone()))?;

    match pid {
        0 => Ok(None),
        pid => Ok(Some(pid.abs())),
    }
}

/// Whether `pid` is a live process other than ourselves or our parent.
/// A process we may not signal belongs to another user and is not our server.
pub fn is_alive(pid: i64) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let pid = Pid::from_raw(raw);
    if pid == getpid() || pid == getppid() {
        return false;
    }
    kill(pid, None).is_ok()
}

/// Fail when the server owning `pgdata` is running.
pub fn ensure_stopped(pgdata: &Path) -> Result<()> {
    match read_pid(pgdata)? {
        Some(pid) if is_alive(pid) => Err(RestoreError::ServerRunning(pid)),
        Some(pid) => {
            debug!(pid, "stale postmaster.pid");
            Ok(())
        }
        None => Ok(()),
    }
}
