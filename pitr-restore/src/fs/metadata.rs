//! File metadata handling for restore operations.
//!
//! Reads what restore needs to know about an on-disk entry and reapplies the
//! permission bits recorded in a manifest.

use std::fs;
use std::path::Path;

/// Metadata of a single entry, read without following symlinks
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Unix permission bits
    pub permissions: Option<u32>,

    /// Is this a directory (or a link to one)?
    pub is_dir: bool,

    /// Is this a symlink?
    pub is_symlink: bool,
}

impl FileMetadata {
    /// Extract metadata from a path. For a symlink, `size` and `is_dir`
    /// describe the link target when it resolves.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let link_metadata = fs::symlink_metadata(path)?;
        let is_symlink = link_metadata.file_type().is_symlink();

        let metadata = if is_symlink {
            fs::metadata(path).unwrap_or(link_metadata)
        } else {
            link_metadata
        };

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode() & 0o7777)
        };

        #[cfg(not(unix))]
        let permissions = None;

        Ok(Self {
            size: metadata.len(),
            permissions,
            is_dir: metadata.is_dir(),
            is_symlink,
        })
    }
}

/// Apply recorded permission bits to a restored entry. A mode of 0 means the
/// manifest did not record one.
#[cfg(unix)]
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if mode == 0 {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn apply_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert!(!metadata.is_dir);
        assert!(!metadata.is_symlink);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_apply_mode() -> std::io::Result<()> {
        let temp_file = NamedTempFile::new()?;

        apply_mode(temp_file.path(), 0o100600)?;
        let metadata = FileMetadata::from_path(temp_file.path())?;
        assert_eq!(metadata.permissions, Some(0o600));

        apply_mode(temp_file.path(), 0)?;
        let metadata = FileMetadata::from_path(temp_file.path())?;
        assert_eq!(metadata.permissions, Some(0o600));

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_reports_target() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("target");
        fs::write(&target, b"12345")?;
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;

        let metadata = FileMetadata::from_path(&link)?;
        assert!(metadata.is_symlink);
        assert_eq!(metadata.size, 5);

        Ok(())
    }
}
