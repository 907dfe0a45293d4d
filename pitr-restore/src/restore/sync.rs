//! Bringing the data directory in line with a backup chain.
//!
//! Each chain member is checked, validated and copied in turn. Once every
//! member is applied, the data directory is pruned so it holds exactly what
//! the newest member's manifest lists.

use crate::catalog::manifest::Manifest;
use crate::catalog::Backup;
use crate::cluster::postmaster::PID_FILE_NAME;
use crate::config::RestoreContext;
use crate::fs::copy::{copy_file, remove_if_exists, CopyMode};
use crate::fs::metadata::apply_mode;
use crate::fs::walker::{compare_path_desc, delete_entry, sort_path_desc, walk_directory, WalkOptions};
use crate::utils::errors::{IoContext, RestoreError, Result};
use crate::utils::shutdown::Interrupt;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Counters for one applied backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub files_restored: usize,
    pub bytes_restored: u64,
    pub directories: usize,
    pub skipped: usize,
}

pub struct FileSynchronizer<'a> {
    ctx: &'a RestoreContext,
    interrupt: &'a Interrupt,
    dry_run: bool,
}

impl<'a> FileSynchronizer<'a> {
    pub fn new(ctx: &'a RestoreContext, interrupt: &'a Interrupt, dry_run: bool) -> Self {
        Self {
            ctx,
            interrupt,
            dry_run,
        }
    }

    /// Page sizes recorded in the backup must match this build.
    pub fn check_compatible(&self, backup: &Backup) -> Result<()> {
        if backup.block_size != self.ctx.block_size {
            return Err(RestoreError::Incompatible {
                what: "BLCKSZ",
                backup: backup.block_size,
                expected: self.ctx.block_size,
            });
        }
        if backup.wal_block_size != self.ctx.wal_block_size {
            return Err(RestoreError::Incompatible {
                what: "XLOG_BLCKSZ",
                backup: backup.wal_block_size,
                expected: self.ctx.wal_block_size,
            });
        }
        Ok(())
    }

    /// Check and copy the captured files of one backup into the data
    /// directory. In a dry run only the checks are performed.
    pub fn apply(&self, backup: &Backup) -> Result<SyncStats> {
        self.check_compatible(backup)?;
        backup.validate(self.ctx.verify_checksums)?;

        let manifest = Manifest::load(&backup.database_file_list())?;
        let mut stats = SyncStats::default();

        if self.dry_run {
            stats.files_restored = manifest.captured().filter(|f| !f.is_dir()).count();
            stats.skipped = manifest.files.len() - stats.files_restored;
            return Ok(stats);
        }

        info!(backup = %backup.id(), "restoring database");
        stats.directories = self.make_directories(backup, &manifest)?;

        let id = backup.id();
        let from_root = backup.database_dir();
        let mode = CopyMode::for_backup(backup.compress_data);

        for entry in &manifest.files {
            self.interrupt.check("restore database")?;

            if entry.is_dir() || !entry.is_captured() {
                stats.skipped += 1;
                continue;
            }

            let relative = entry.confined_path(&id)?;
            let from = from_root.join(relative);
            let to = self.ctx.pgdata.join(relative);
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent).with_path("create directory", parent)?;
            }

            let written = copy_file(&from, &to, mode).with_path("restore file", &to)?;
            apply_mode(&to, entry.mode).with_path("set mode of", &to)?;
            debug!(path = %entry.path, bytes = written, "restored");

            stats.files_restored += 1;
            stats.bytes_restored += written;
        }

        info!(
            backup = %backup.id(),
            files = stats.files_restored,
            bytes = stats.bytes_restored,
            "database restored"
        );
        Ok(stats)
    }

    /// Create the directory skeleton: directories listed in the manifest,
    /// then whatever the backup's `mkdirs.sh` creates (tablespace links).
    fn make_directories(&self, backup: &Backup, manifest: &Manifest) -> Result<usize> {
        let pgdata = &self.ctx.pgdata;
        std::fs::create_dir_all(pgdata).with_path("create directory", pgdata)?;

        let id = backup.id();
        let mut created = 0;
        for entry in manifest.files.iter().filter(|f| f.is_dir()) {
            let dir = pgdata.join(entry.confined_path(&id)?);
            if dir.exists() {
                continue;
            }
            std::fs::create_dir_all(&dir).with_path("create directory", &dir)?;
            apply_mode(&dir, entry.mode).with_path("set mode of", &dir)?;
            created += 1;
        }

        let script = backup.mkdirs_script();
        if script.exists() {
            run_mkdirs(&script, pgdata)?;
        }

        Ok(created)
    }

    /// Delete everything under the data directory that `manifest` does not
    /// list, children before parents. Excluded names and paths are left alone.
    pub fn reconcile(&self, manifest: &Manifest) -> Result<usize> {
        if self.dry_run {
            return Ok(0);
        }

        let pgdata = &self.ctx.pgdata;
        let expected = manifest.rebased_paths_desc(pgdata);

        let options = WalkOptions {
            follow_links: true,
            exclude_patterns: self.ctx.exclude.clone(),
        };
        let mut actual = walk_directory(pgdata, &options).with_path("list", pgdata)?;
        sort_path_desc(&mut actual);

        let mut deleted = 0;
        for file in &actual {
            if expected
                .binary_search_by(|listed| compare_path_desc(listed, &file.path))
                .is_ok()
            {
                continue;
            }
            debug!(path = %file.path.display(), "delete");
            delete_entry(&file.path).with_path("delete", &file.path)?;
            deleted += 1;
        }

        info!(deleted, "data directory reconciled");
        Ok(deleted)
    }

    /// Drop a lock file left behind by the server the backup was taken from.
    pub fn remove_pid_file(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let path = self.ctx.pgdata.join(PID_FILE_NAME);
        remove_if_exists(&path).with_path("remove", &path)
    }
}

fn run_mkdirs(script: &Path, pgdata: &Path) -> Result<()> {
    debug!(script = %script.display(), "running directory script");
    let status = Command::new("sh")
        .arg(script)
        .current_dir(pgdata)
        .status()
        .with_path("execute", script)?;

    if !status.success() {
        return Err(RestoreError::ExternalCommand(format!(
            "{} exited with {}",
            script.display(),
            status
        )));
    }
    Ok(())
}
