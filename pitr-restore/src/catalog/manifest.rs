//! Per-backup file manifests.
//!
//! `file_database.json` and `file_arclog.json` record every entry of the
//! captured tree with its mode and size. Entries whose `write_size` is
//! [`BYTES_INVALID`] are listed but were not captured: directories, and files
//! an incremental backup found unchanged.

use crate::utils::errors::{IoContext, RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// `write_size` of an entry whose content is not in this backup.
pub const BYTES_INVALID: i64 = -1;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One manifest line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative to the captured tree's root
    pub path: String,
    pub kind: FileKind,
    #[serde(default)]
    pub mode: u32,
    /// Logical size of the source file
    #[serde(default)]
    pub size: u64,
    /// Bytes stored in the backup, or [`BYTES_INVALID`]
    pub write_size: i64,
    /// CRC-32 of the stored bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc: Option<u32>,
}

impl FileEntry {
    pub fn is_captured(&self) -> bool {
        self.write_size != BYTES_INVALID
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// `path` as a relative path that stays inside the tree it is restored
    /// into. Absolute paths and `..` components are rejected.
    pub fn confined_path(&self, backup_id: &str) -> Result<&Path> {
        let path = Path::new(&self.path);
        let confined = !self.path.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(RestoreError::CorruptedBackup {
                backup: backup_id.to_string(),
                reason: format!("file list entry \"{}\" points outside the backup tree", self.path),
            });
        }
        Ok(path)
    }

    /// Last path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn new(files: Vec<FileEntry>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            files,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).with_path("read file list", path)?;
        let manifest: Manifest = serde_json::from_slice(&content).map_err(|e| RestoreError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), files = manifest.files.len(), "file list loaded");
        Ok(manifest)
    }

    /// Like [`Manifest::load`], but a missing file is an empty manifest.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(Vec::new()));
        }
        Self::load(path)
    }

    /// Entries with content in this backup, in manifest order.
    pub fn captured(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(|f| f.is_captured())
    }

    /// Absolute paths of every entry rebased onto `root`, sorted descending so
    /// children come before their parent.
    pub fn rebased_paths_desc(&self, root: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.iter().map(|f| root.join(&f.path)).collect();
        paths.sort_by(|a, b| crate::fs::walker::compare_path_desc(a, b));
        paths.dedup();
        paths
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_vec_pretty(self).map_err(|e| RestoreError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, text).with_path("write file list", path)
    }
}

/// Check that every captured entry has its stored file under `store` with
/// the recorded size and, when asked, the recorded CRC.
pub fn validate(store: &Path, manifest: &Manifest, backup_id: &str, verify_checksums: bool) -> Result<()> {
    let corrupted = |reason: String| RestoreError::CorruptedBackup {
        backup: backup_id.to_string(),
        reason,
    };

    for entry in &manifest.files {
        entry.confined_path(backup_id)?;
    }

    for entry in manifest.captured().filter(|f| !f.is_dir()) {
        let stored = store.join(&entry.path);
        let actual = match std::fs::metadata(&stored) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corrupted(format!("\"{}\" is missing", entry.path)));
            }
            Err(e) => return Err(RestoreError::io("stat", &stored, e)),
        };

        if actual as i64 != entry.write_size {
            return Err(corrupted(format!(
                "size of \"{}\" is {}, expected {}",
                entry.path, actual, entry.write_size
            )));
        }

        if verify_checksums {
            if let Some(expected) = entry.crc {
                let crc = file_crc(&stored)?;
                if crc != expected {
                    return Err(corrupted(format!(
                        "CRC of \"{}\" is {:08X}, expected {:08X}",
                        entry.path, crc, expected
                    )));
                }
            }
        }
    }

    Ok(())
}

/// CRC-32 of a file's bytes.
pub fn file_crc(path: &Path) -> Result<u32> {
    let file = std::fs::File::open(path).with_path("open", path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).with_path("read", path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
