//! Backup catalog access.
//!
//! Each backup lives in `<backup_path>/<YYYYMMDD>/<HHMMSS>/`, named after its
//! start time, with a `backup.toml` record next to the captured data:
//!
//! ```text
//! 20240105/031500/
//!     backup.toml          record (mode, status, timeline, LSNs, ...)
//!     database/            captured data files
//!     arclog/              captured archived WAL
//!     file_database.json   manifest of database/
//!     file_arclog.json     manifest of arclog/
//!     mkdirs.sh            optional directory/link creation script
//! ```

pub mod lock;
pub mod manifest;

use crate::utils::errors::{IoContext, RestoreError, Result};
use crate::wal::{Lsn, TimeLineId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const BACKUP_RECORD_FILE: &str = "backup.toml";
pub const DATABASE_DIR: &str = "database";
pub const ARCLOG_DIR: &str = "arclog";
pub const DATABASE_FILE_LIST: &str = "file_database.json";
pub const ARCLOG_FILE_LIST: &str = "file_arclog.json";
pub const MKDIRS_SH_FILE: &str = "mkdirs.sh";
pub const TIMELINE_HISTORY_DIR: &str = "timeline_history";
/// Work area under the backup path where live WAL and server logs are parked.
pub const RESTORE_WORK_DIR: &str = "backup";
pub const SRVLOG_DIR: &str = "srvlog";

/// What a backup captured. Ordered: each mode includes the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupMode {
    /// Archived WAL only
    Archive,
    Incremental,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Ok,
    Running,
    Error,
    Deleting,
    Deleted,
    /// Finished but not yet validated
    Done,
    Corrupt,
}

/// One catalog entry, as recorded by the backup command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub backup_mode: BackupMode,
    pub status: BackupStatus,
    /// Timeline the backup was taken on
    pub timeline: TimeLineId,
    pub start_lsn: Lsn,
    pub stop_lsn: Lsn,
    /// Backup identity
    pub start_time: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveDateTime>,
    pub block_size: u32,
    pub wal_block_size: u32,
    #[serde(default)]
    pub compress_data: bool,

    /// Directory holding this backup
    #[serde(skip)]
    pub root: PathBuf,
}

impl Backup {
    /// `YYYYMMDD/HHMMSS`, the identifier operators see.
    pub fn id(&self) -> String {
        self.start_time.format("%Y%m%d/%H%M%S").to_string()
    }

    pub fn has_database(&self) -> bool {
        self.backup_mode >= BackupMode::Incremental
    }

    pub fn has_arclog(&self) -> bool {
        self.backup_mode >= BackupMode::Archive
    }

    pub fn database_dir(&self) -> PathBuf {
        self.root.join(DATABASE_DIR)
    }

    pub fn arclog_dir(&self) -> PathBuf {
        self.root.join(ARCLOG_DIR)
    }

    pub fn database_file_list(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_LIST)
    }

    pub fn arclog_file_list(&self) -> PathBuf {
        self.root.join(ARCLOG_FILE_LIST)
    }

    pub fn mkdirs_script(&self) -> PathBuf {
        self.root.join(MKDIRS_SH_FILE)
    }

    /// Check stored files against the manifests: sizes always, CRCs when
    /// `verify_checksums` is set.
    pub fn validate(&self, verify_checksums: bool) -> Result<()> {
        let id = self.id();
        if self.has_database() {
            let manifest = manifest::Manifest::load(&self.database_file_list())?;
            manifest::validate(&self.database_dir(), &manifest, &id, verify_checksums)?;
        }
        if self.has_arclog() {
            let manifest = manifest::Manifest::load_or_empty(&self.arclog_file_list())?;
            manifest::validate(&self.arclog_dir(), &manifest, &id, verify_checksums)?;
        }
        debug!(backup = %id, "backup validated");
        Ok(())
    }

    /// Read a `backup.toml` record from a backup directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(BACKUP_RECORD_FILE);
        let content = std::fs::read_to_string(&path).with_path("read backup record", &path)?;
        let mut backup: Backup = toml::from_str(&content).map_err(|e| RestoreError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        backup.root = dir.to_path_buf();
        Ok(backup)
    }
}

impl fmt::Display for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, tli {}, stop {})",
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.backup_mode,
            self.timeline,
            self.stop_lsn
        )
    }
}

/// All backups found under the backup path, newest first.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    backups: Vec<Backup>,
}

impl Catalog {
    pub fn new(mut backups: Vec<Backup>) -> Self {
        backups.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Self { backups }
    }

    /// Scan `<backup_path>/<date>/<time>/backup.toml`. Directories that do not
    /// look like backups are ignored; unreadable records are skipped.
    pub fn load(backup_path: &Path) -> Result<Self> {
        let mut backups = Vec::new();

        for date_dir in list_dirs(backup_path, 8)? {
            for time_dir in list_dirs(&date_dir, 6)? {
                if !time_dir.join(BACKUP_RECORD_FILE).exists() {
                    continue;
                }
                match Backup::load(&time_dir) {
                    Ok(backup) => backups.push(backup),
                    Err(e) => warn!(path = %time_dir.display(), error = %e, "skipping unreadable backup"),
                }
            }
        }

        debug!(count = backups.len(), "backup catalog loaded");
        Ok(Self::new(backups))
    }

    /// Newest first; index 0 is the most recent backup.
    pub fn backups(&self) -> &[Backup] {
        &self.backups
    }

    /// Same order as [`Catalog::backups`]; entries can be updated but not reordered.
    pub fn backups_mut(&mut self) -> &mut [Backup] {
        &mut self.backups
    }

    pub fn get(&self, index: usize) -> Option<&Backup> {
        self.backups.get(index)
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }
}

/// Subdirectories of `dir` whose names are exactly `digits` decimal digits.
fn list_dirs(dir: &Path, digits: usize) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RestoreError::io("read directory", dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_path("read directory", dir)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.len() == digits
            && name.bytes().all(|b| b.is_ascii_digit())
            && entry.path().is_dir()
        {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}


#[cfg(test)]
mod tests {
    use super::testing::{backup, write_record};
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_mode_ordering() {
        assert!(BackupMode::Archive < BackupMode::Incremental);
        assert!(BackupMode::Incremental < BackupMode::Full);

        let archive = backup(BackupMode::Archive, BackupStatus::Ok, 1, 10, 0);
        assert!(archive.has_arclog());
        assert!(!archive.has_database());
    }

    #[test]
    fn test_record_parses() {
        let record: Backup = toml::from_str(
            r#"
            backup_mode = "INCREMENTAL"
            status = "OK"
            timeline = 2
            start_lsn = "0/0B000020"
            stop_lsn = "0/0B0000F8"
            start_time = "2024-01-05T03:15:00"
            block_size = 8192
            wal_block_size = 8192
            compress_data = true
            "#,
        )
        .unwrap();

        assert_eq!(record.backup_mode, BackupMode::Incremental);
        assert_eq!(record.status, BackupStatus::Ok);
        assert_eq!(record.stop_lsn, Lsn::new(0, 0x0B00_00F8));
        assert_eq!(record.id(), "20240105/031500");
        assert!(record.compress_data);
    }

    #[test]
    fn test_load_sorts_newest_first_and_skips_junk() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_record(root, &backup(BackupMode::Full, BackupStatus::Ok, 1, 10, 5))?;
        write_record(root, &backup(BackupMode::Incremental, BackupStatus::Ok, 1, 20, 30))?;
        write_record(root, &backup(BackupMode::Full, BackupStatus::Error, 1, 30, 1))?;

        fs::create_dir_all(root.join("timeline_history"))?;
        fs::create_dir_all(root.join("20240101/999"))?;
        fs::create_dir_all(root.join("20240102/120000"))?;
        fs::write(root.join("20240102/120000/backup.toml"), "not = [valid")?;

        let catalog = Catalog::load(root).unwrap();
        let minutes: Vec<_> = catalog
            .backups()
            .iter()
            .map(|b| b.start_time.format("%M").to_string())
            .collect();
        assert_eq!(minutes, vec!["30", "05", "01"]);
        assert_eq!(catalog.get(0).unwrap().root, root.join("20240101/003000"));
        Ok(())
    }

    #[test]
    fn test_load_missing_backup_path() {
        let catalog = Catalog::load(Path::new("/nonexistent/backups")).unwrap();
        assert!(catalog.is_empty());
    }
}
