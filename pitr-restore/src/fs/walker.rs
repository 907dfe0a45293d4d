//! Directory traversal for restore.
//!
//! Lists a tree (directories included, root excluded) so callers can diff it
//! against a manifest or delete it leaf-first.

use super::metadata::FileMetadata;
use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links (tablespace links in the data directory)
    pub follow_links: bool,

    /// Entries skipped together with their subtree: a bare name matches any
    /// entry with that file name, an absolute path matches that path only.
    pub exclude_patterns: Vec<String>,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,

    /// Is this a symlink?
    pub is_symlink: bool,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_symlink: entry.path_is_symlink(),
        })
    }

    /// Relative path as the string manifests use.
    pub fn relative_str(&self) -> String {
        self.relative_path.to_string_lossy().into_owned()
    }
}

/// Walk a directory tree and collect every entry below `root`.
///
/// A missing root yields an empty list.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    if let Err(e) = std::fs::symlink_metadata(root) {
        if e.kind() == ErrorKind::NotFound {
            return Ok(files);
        }
        return Err(e);
    }

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !should_exclude(entry, &options.exclude_patterns));

    for entry in walker {
        let entry = entry?;
        files.push(FileInfo::from_entry(&entry, root)?);
    }

    Ok(files)
}

/// Descending path order: children sort before their parent directory.
pub fn compare_path_desc(a: &Path, b: &Path) -> Ordering {
    b.as_os_str().cmp(a.as_os_str())
}

pub fn sort_path_desc(files: &mut [FileInfo]) {
    files.sort_by(|a, b| compare_path_desc(&a.path, &b.path));
}

/// Remove one entry: empty directories with `rmdir`, everything else (links
/// included) with `unlink`. An entry that is already gone is not an error.
pub fn delete_entry(path: &Path) -> std::io::Result<()> {
    let metadata = match FileMetadata::from_path(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir && !metadata.is_symlink {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name();

    patterns.iter().any(|pattern| {
        let pattern_path = Path::new(pattern);
        if pattern_path.is_absolute() {
            entry.path() == pattern_path
        } else {
            file_name == pattern.as_str()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn relative(files: &[FileInfo]) -> Vec<String> {
        files.iter().map(|f| f.relative_str()).collect()
    }

    #[test]
    fn test_walk_missing_root() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(&temp_dir.path().join("absent"), &WalkOptions::default())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_includes_directories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("base"))?;
        fs::write(temp_dir.path().join("base/1"), b"page")?;
        fs::write(temp_dir.path().join("PG_VERSION"), b"8.4")?;

        let mut files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        sort_path_desc(&mut files);

        assert_eq!(relative(&files), vec!["base/1", "base", "PG_VERSION"]);
        assert!(files[1].is_dir);
        assert_eq!(files[0].size, 4);
        Ok(())
    }

    #[test]
    fn test_exclude_by_name_and_absolute_path() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("pg_xlog/archive_status"))?;
        fs::create_dir_all(root.join("pg_log"))?;
        fs::write(root.join("pg_log/server.log"), b"log")?;
        fs::write(root.join("postgresql.conf"), b"")?;

        let options = WalkOptions {
            follow_links: false,
            exclude_patterns: vec![
                "pg_xlog".to_string(),
                root.join("pg_log").to_string_lossy().into_owned(),
            ],
        };
        let files = walk_directory(root, &options)?;
        assert_eq!(relative(&files), vec!["postgresql.conf"]);
        Ok(())
    }

    #[test]
    fn test_delete_leaf_first() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b"))?;
        fs::write(root.join("a/b/c"), b"x")?;
        fs::write(root.join("a-d"), b"y")?;

        let mut files = walk_directory(root, &WalkOptions::default())?;
        sort_path_desc(&mut files);
        for file in &files {
            delete_entry(&file.path)?;
        }

        assert!(walk_directory(root, &WalkOptions::default())?.is_empty());
        assert!(root.exists());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_delete_symlink_to_directory_keeps_target() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("tablespace");
        fs::create_dir(&target)?;
        fs::write(target.join("16384"), b"rel")?;
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;

        delete_entry(&link)?;
        assert!(!link.exists());
        assert!(target.join("16384").exists());

        delete_entry(&link)?;
        Ok(())
    }
}
