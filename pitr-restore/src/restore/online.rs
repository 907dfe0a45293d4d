//! Keeping the live WAL and server logs safe across a restore.
//!
//! Before the data directory is cleared, its `pg_xlog` and the server log
//! directory are copied into `<backup_path>/backup/`. After the backups are
//! restored, the saved WAL is copied back into `pg_xlog` so segments that were
//! never archived still reach recovery.

use crate::catalog::{RESTORE_WORK_DIR, SRVLOG_DIR};
use crate::config::RestoreContext;
use crate::fs::copy::copy_tree;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::{IoContext, Result};
use crate::wal::PG_XLOG_DIR;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preserved {
    /// An earlier snapshot was kept as is
    Reused,
    Captured { wal_files: usize, log_files: usize },
}

pub struct OnlineState {
    saved_wal: PathBuf,
    saved_logs: PathBuf,
}

impl OnlineState {
    pub fn new(ctx: &RestoreContext) -> Self {
        let work = ctx.backup_path.join(RESTORE_WORK_DIR);
        Self {
            saved_wal: work.join(PG_XLOG_DIR),
            saved_logs: work.join(SRVLOG_DIR),
        }
    }

    /// Where the live WAL is parked; also searched for history files.
    pub fn saved_wal_dir(&self) -> &Path {
        &self.saved_wal
    }

    fn has_snapshot(&self) -> Result<bool> {
        let options = WalkOptions {
            follow_links: true,
            exclude_patterns: Vec::new(),
        };
        let files = walk_directory(&self.saved_wal, &options).with_path("list", &self.saved_wal)?;
        Ok(!files.is_empty())
    }

    /// Snapshot the live WAL and server logs. An existing snapshot is reused
    /// unless the cluster has moved to another timeline since the backup
    /// (`re_recovery`), in which case it is refreshed.
    pub fn preserve(&self, ctx: &RestoreContext, re_recovery: bool) -> Result<Preserved> {
        if !re_recovery && self.has_snapshot()? {
            info!(dir = %self.saved_wal.display(), "online WAL already saved, reusing it");
            return Ok(Preserved::Reused);
        }

        let pg_xlog = ctx.pg_xlog();
        let wal_files = copy_tree(&pg_xlog, &self.saved_wal).with_path("save online WAL from", &pg_xlog)?;
        let log_files =
            copy_tree(&ctx.srvlog_path, &self.saved_logs).with_path("save server log from", &ctx.srvlog_path)?;

        info!(wal_files, log_files, "online WAL and server log saved");
        Ok(Preserved::Captured { wal_files, log_files })
    }

    /// Copy the saved WAL back into the restored `pg_xlog`.
    pub fn replay(&self, ctx: &RestoreContext) -> Result<usize> {
        let pg_xlog = ctx.pg_xlog();
        let copied = copy_tree(&self.saved_wal, &pg_xlog).with_path("restore online WAL into", &pg_xlog)?;
        info!(files = copied, "online WAL restored");
        Ok(copied)
    }
}
