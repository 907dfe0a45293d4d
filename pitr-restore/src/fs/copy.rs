//! File materialization: plain copies, decompressing copies and links.

use super::walker::{walk_directory, WalkOptions};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

/// How stored bytes are turned into the restored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    Plain,
    /// The stored file is a zstd frame
    Decompress,
}

impl CopyMode {
    pub fn for_backup(compressed: bool) -> Self {
        if compressed {
            CopyMode::Decompress
        } else {
            CopyMode::Plain
        }
    }
}

/// Remove a file or link, ignoring "does not exist".
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Copy `from` to `to`, returning the number of bytes written.
///
/// Any existing `to` is unlinked first so a link into the backup store is
/// replaced, never written through.
pub fn copy_file(from: &Path, to: &Path, mode: CopyMode) -> io::Result<u64> {
    remove_if_exists(to)?;

    let mut reader = BufReader::new(File::open(from)?);
    let mut writer = BufWriter::new(File::create(to)?);

    let written = match mode {
        CopyMode::Plain => io::copy(&mut reader, &mut writer)?,
        CopyMode::Decompress => decompress(&mut reader, &mut writer)?,
    };
    writer.flush()?;

    Ok(written)
}

#[cfg(feature = "compression")]
fn decompress<R: io::BufRead, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<u64> {
    let mut decoder = zstd::stream::read::Decoder::with_buffer(reader)?;
    io::copy(&mut decoder, writer)
}

#[cfg(not(feature = "compression"))]
fn decompress<R: io::BufRead, W: Write>(_reader: &mut R, _writer: &mut W) -> io::Result<u64> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "built without compression support",
    ))
}

/// Point `link` at `target` instead of copying bytes.
#[cfg(unix)]
pub fn link_file(target: &Path, link: &Path) -> io::Result<()> {
    remove_if_exists(link)?;
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn link_file(target: &Path, link: &Path) -> io::Result<()> {
    remove_if_exists(link)?;
    fs::hard_link(target, link)
}

/// Copy every file below `from` into `to`, recreating subdirectories.
/// A missing `from` copies nothing. Returns the number of files copied.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<usize> {
    let options = WalkOptions {
        follow_links: true,
        exclude_patterns: Vec::new(),
    };

    fs::create_dir_all(to)?;
    let mut copied = 0;

    for entry in walk_directory(from, &options)? {
        let target = to.join(&entry.relative_path);
        if entry.is_dir {
            fs::create_dir_all(&target)?;
        } else {
            copy_file(&entry.path, &target, CopyMode::Plain)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_copy_overwrites() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let from = temp_dir.path().join("from");
        let to = temp_dir.path().join("to");
        fs::write(&from, b"new content")?;
        fs::write(&to, b"old content that is longer")?;

        let written = copy_file(&from, &to, CopyMode::Plain)?;
        assert_eq!(written, 11);
        assert_eq!(fs::read(&to)?, b"new content");
        Ok(())
    }

    #[test]
    #[cfg(feature = "compression")]
    fn test_decompressing_copy() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let from = temp_dir.path().join("000000010000000000000001");
        let to = temp_dir.path().join("restored");
        let payload = vec![7u8; 64 * 1024];
        fs::write(&from, zstd::encode_all(&payload[..], 3)?)?;

        let written = copy_file(&from, &to, CopyMode::Decompress)?;
        assert_eq!(written, payload.len() as u64);
        assert_eq!(fs::read(&to)?, payload);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_replaces_link_without_touching_target() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let stored = temp_dir.path().join("stored");
        let link = temp_dir.path().join("link");
        let source = temp_dir.path().join("source");
        fs::write(&stored, b"immutable")?;
        fs::write(&source, b"replacement")?;
        link_file(&stored, &link)?;

        copy_file(&source, &link, CopyMode::Plain)?;

        assert_eq!(fs::read(&stored)?, b"immutable");
        assert_eq!(fs::read(&link)?, b"replacement");
        assert!(!fs::symlink_metadata(&link)?.file_type().is_symlink());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_link_replaces_existing_file() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let stored = temp_dir.path().join("stored");
        let link = temp_dir.path().join("link");
        fs::write(&stored, b"wal bytes")?;
        fs::write(&link, b"stale")?;

        link_file(&stored, &link)?;
        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(fs::read(&link)?, b"wal bytes");
        Ok(())
    }

    #[test]
    fn test_copy_tree() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let from = temp_dir.path().join("pg_xlog");
        fs::create_dir_all(from.join("archive_status"))?;
        fs::write(from.join("000000010000000000000003"), b"wal")?;
        fs::write(from.join("archive_status/000000010000000000000003.ready"), b"")?;

        let to = temp_dir.path().join("saved");
        assert_eq!(copy_tree(&from, &to)?, 2);
        assert!(to.join("archive_status/000000010000000000000003.ready").exists());

        assert_eq!(copy_tree(&temp_dir.path().join("absent"), &to)?, 0);
        Ok(())
    }
}
