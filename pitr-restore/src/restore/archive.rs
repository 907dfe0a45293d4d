//! Restoring a backup's archived WAL into the archive directory.
//!
//! Compressed backups are decompressed into place. Otherwise the archive entry
//! becomes a link to the stored segment, which is never modified once written.

use crate::catalog::manifest::Manifest;
use crate::catalog::Backup;
use crate::config::RestoreContext;
use crate::fs::copy::{copy_file, link_file, CopyMode};
use crate::utils::errors::{IoContext, Result};
use crate::utils::shutdown::Interrupt;
use crate::wal::is_history_file;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub decompressed: usize,
    pub linked: usize,
    pub skipped: usize,
}

impl ArchiveStats {
    pub fn restored(&self) -> usize {
        self.decompressed + self.linked
    }
}

pub struct ArchiveRestorer<'a> {
    ctx: &'a RestoreContext,
    interrupt: &'a Interrupt,
    dry_run: bool,
}

impl<'a> ArchiveRestorer<'a> {
    pub fn new(ctx: &'a RestoreContext, interrupt: &'a Interrupt, dry_run: bool) -> Self {
        Self {
            ctx,
            interrupt,
            dry_run,
        }
    }

    pub fn restore(&self, backup: &Backup) -> Result<ArchiveStats> {
        let manifest = Manifest::load_or_empty(&backup.arclog_file_list())?;
        let id = backup.id();
        let from_root = backup.arclog_dir();
        let arclog = &self.ctx.arclog_path;
        let mut stats = ArchiveStats::default();

        if !self.dry_run {
            info!(backup = %backup.id(), files = manifest.files.len(), "restoring WAL");
            std::fs::create_dir_all(arclog).with_path("create directory", arclog)?;
        }

        for entry in &manifest.files {
            self.interrupt.check("restore WAL")?;

            // History files come from the catalog's own history directory.
            if !entry.is_captured() || entry.is_dir() || is_history_file(&entry.path) {
                stats.skipped += 1;
                continue;
            }

            let relative = entry.confined_path(&id)?;
            let from = from_root.join(relative);
            let to = arclog.join(relative);

            if backup.compress_data {
                if !self.dry_run {
                    copy_file(&from, &to, CopyMode::Decompress).with_path("decompress", &to)?;
                    debug!(file = %entry.path, "decompressed");
                }
                stats.decompressed += 1;
            } else {
                if !self.dry_run {
                    link_file(&from, &to).with_path("create link", &to)?;
                    debug!(file = %entry.path, "linked");
                }
                stats.linked += 1;
            }
        }

        Ok(stats)
    }
}
