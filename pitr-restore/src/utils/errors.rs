//! Error types for the restore process.
//!
//! Every failure aborts the whole restore. Each variant carries a stable name
//! and a distinct exit status so wrapper scripts can tell categories apart.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("required parameter not specified: {0}")]
    MissingConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("another restore or backup is running, stop restore")]
    AlreadyRunning,

    #[error("PostgreSQL server is running (pid {0})")]
    ServerRunning(i64),

    #[error("invalid data in PID file \"{}\"", .0.display())]
    PidFileBroken(PathBuf),

    #[error("no full backup found, can't restore")]
    NoBackup,

    #[error("{what}({backup}) is not compatible({expected} expected)")]
    Incompatible {
        what: &'static str,
        backup: u32,
        expected: u32,
    },

    #[error("corrupted timeline history \"{}\": {reason}", .path.display())]
    CorruptedHistory { path: PathBuf, reason: String },

    #[error("corrupted backup {backup}: {reason}")]
    CorruptedBackup { backup: String, reason: String },

    #[error("can't restore from compressed backup {0} (compression not supported in this installation)")]
    Unsupported(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("external command failed: {0}")]
    ExternalCommand(String),

    #[error("interrupted during {0}")]
    Interrupted(&'static str),
}

impl RestoreError {
    /// Wraps an I/O error with the operation and path it happened on.
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        RestoreError::Io {
            context: format!("can't {} \"{}\"", action, path.display()),
            source,
        }
    }

    /// Stable error name, printed next to every fatal diagnostic.
    pub fn code(&self) -> &'static str {
        match self {
            RestoreError::MissingConfig(_) | RestoreError::InvalidConfig(_) => "ERROR_ARGS",
            RestoreError::AlreadyRunning => "ERROR_ALREADY_RUNNING",
            RestoreError::ServerRunning(_) => "ERROR_PG_RUNNING",
            RestoreError::PidFileBroken(_) => "ERROR_PID_BROKEN",
            RestoreError::NoBackup => "ERROR_NO_BACKUP",
            RestoreError::Incompatible { .. } => "ERROR_PG_INCOMPATIBLE",
            RestoreError::CorruptedHistory { .. } | RestoreError::CorruptedBackup { .. } => {
                "ERROR_CORRUPTED"
            }
            RestoreError::Unsupported(_) => "ERROR_NOT_SUPPORTED",
            RestoreError::Io { .. }
            | RestoreError::Parse { .. }
            | RestoreError::ExternalCommand(_) => "ERROR_SYSTEM",
            RestoreError::Interrupted(_) => "ERROR_INTERRUPTED",
        }
    }

    /// Process exit status for this error category.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            "ERROR_SYSTEM" => 10,
            "ERROR_ARGS" => 12,
            "ERROR_INTERRUPTED" => 13,
            "ERROR_NO_BACKUP" => 21,
            "ERROR_CORRUPTED" => 22,
            "ERROR_ALREADY_RUNNING" => 23,
            "ERROR_PG_INCOMPATIBLE" => 24,
            "ERROR_PG_RUNNING" => 25,
            "ERROR_PID_BROKEN" => 26,
            "ERROR_NOT_SUPPORTED" => 27,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;

/// Attaches a path to a bare `io::Result`.
pub trait IoContext<T> {
    fn with_path(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|e| RestoreError::io(action, path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let errors = vec![
            RestoreError::MissingConfig("PGDATA".into()),
            RestoreError::AlreadyRunning,
            RestoreError::ServerRunning(42),
            RestoreError::PidFileBroken(PathBuf::from("/data/postmaster.pid")),
            RestoreError::NoBackup,
            RestoreError::Incompatible { what: "BLCKSZ", backup: 4096, expected: 8192 },
            RestoreError::CorruptedHistory { path: PathBuf::from("x"), reason: "y".into() },
            RestoreError::Unsupported("20240101/000000".into()),
            RestoreError::io("open", Path::new("/nope"), std::io::ErrorKind::NotFound.into()),
            RestoreError::Interrupted("restore database"),
        ];

        let codes: HashSet<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_io_error_keeps_path_and_source() {
        let err = RestoreError::io(
            "remove file",
            Path::new("/data/base/1"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let text = err.to_string();
        assert!(text.contains("can't remove file \"/data/base/1\""));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.code(), "ERROR_SYSTEM");
    }

    #[test]
    fn test_incompatible_message() {
        let err = RestoreError::Incompatible { what: "XLOG_BLCKSZ", backup: 16384, expected: 8192 };
        assert_eq!(err.to_string(), "XLOG_BLCKSZ(16384) is not compatible(8192 expected)");
        assert_eq!(err.code(), "ERROR_PG_INCOMPATIBLE");
    }
}
