//! Configuration management for the restore tool.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! and command-line overrides. [`Config::resolve`] produces the immutable
//! [`RestoreContext`] that every restore component receives.

use crate::cluster::control::ControlFileLayout;
use crate::utils::errors::{RestoreError, Result};
use crate::wal::history::TimelineBoundary;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the optional configuration file inside the backup path.
pub const CONFIG_FILE_NAME: &str = "pitr-restore.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the backup catalog
    pub backup_path: Option<PathBuf>,

    /// Data directory to restore into
    pub pgdata: Option<PathBuf>,

    /// Archive directory WAL is restored into
    pub arclog_path: Option<PathBuf>,

    /// Server log directory preserved across the restore
    pub srvlog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Data page size of the server build (BLCKSZ)
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// WAL page size of the server build (XLOG_BLCKSZ)
    #[serde(default = "default_block_size")]
    pub wal_block_size: u32,

    #[serde(default)]
    pub control_file: ControlFileLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Names (or absolute paths) left alone when pruning the data directory
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Whether a backup stopping exactly at a timeline switch belongs to the parent
    #[serde(default)]
    pub timeline_boundary: TimelineBoundary,

    /// Verify CRCs of stored files in addition to their sizes
    #[serde(default)]
    pub verify_checksums: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_block_size() -> u32 {
    8192
}

fn default_exclude() -> Vec<String> {
    vec![
        "pg_xlog".to_string(),
        "pg_stat_tmp".to_string(),
        "pgsql_tmp".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            wal_block_size: default_block_size(),
            control_file: ControlFileLayout::default(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
            timeline_boundary: TimelineBoundary::default(),
            verify_checksums: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override paths from `BACKUP_PATH`, `PGDATA`, `ARCLOG_PATH` and `SRVLOG_PATH`.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var_os(key).map(PathBuf::from));
    }

    fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let paths = &mut self.paths;
        for (slot, key) in [
            (&mut paths.backup_path, "BACKUP_PATH"),
            (&mut paths.pgdata, "PGDATA"),
            (&mut paths.arclog_path, "ARCLOG_PATH"),
            (&mut paths.srvlog_path, "SRVLOG_PATH"),
        ] {
            if let Some(value) = lookup(key) {
                *slot = Some(value);
            }
        }
    }

    /// Validate the paths and freeze everything into a [`RestoreContext`].
    pub fn resolve(&self) -> Result<RestoreContext> {
        let backup_path = required(&self.paths.backup_path, "BACKUP_PATH (-B, --backup-path)")?;
        let pgdata = required(&self.paths.pgdata, "PGDATA (-D, --pgdata)")?;
        let arclog_path = required(&self.paths.arclog_path, "ARCLOG_PATH (-A, --arclog-path)")?;
        let srvlog_path = required(&self.paths.srvlog_path, "SRVLOG_PATH (-S, --srvlog-path)")?;

        if backup_path.exists() && !backup_path.is_dir() {
            return Err(RestoreError::InvalidConfig(
                "-B, --backup-path must be a path to directory".to_string(),
            ));
        }

        let mut exclude = self.restore.exclude.clone();
        exclude.push(arclog_path.to_string_lossy().into_owned());
        exclude.push(srvlog_path.to_string_lossy().into_owned());

        Ok(RestoreContext {
            backup_path,
            pgdata,
            arclog_path,
            srvlog_path,
            block_size: self.server.block_size,
            wal_block_size: self.server.wal_block_size,
            control_file: self.server.control_file.clone(),
            exclude,
            timeline_boundary: self.restore.timeline_boundary,
            verify_checksums: self.restore.verify_checksums,
            compression_supported: cfg!(feature = "compression"),
        })
    }
}

fn required(value: &Option<PathBuf>, name: &str) -> Result<PathBuf> {
    let path = value
        .clone()
        .ok_or_else(|| RestoreError::MissingConfig(name.to_string()))?;
    if !path.is_absolute() {
        return Err(RestoreError::InvalidConfig(format!(
            "{} must be an absolute path",
            name
        )));
    }
    Ok(path)
}

/// Everything a restore run needs to know, fixed before any work starts.
#[derive(Debug, Clone)]
pub struct RestoreContext {
    pub backup_path: PathBuf,
    pub pgdata: PathBuf,
    pub arclog_path: PathBuf,
    pub srvlog_path: PathBuf,
    pub block_size: u32,
    pub wal_block_size: u32,
    pub control_file: ControlFileLayout,
    pub exclude: Vec<String>,
    pub timeline_boundary: TimelineBoundary,
    pub verify_checksums: bool,
    pub compression_supported: bool,
}

impl RestoreContext {
    /// `$PGDATA/pg_xlog`, where the server keeps its live WAL.
    pub fn pg_xlog(&self) -> PathBuf {
        self.pgdata.join(crate::wal::PG_XLOG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_paths() -> PathsConfig {
        PathsConfig {
            backup_path: Some(PathBuf::from("/backup")),
            pgdata: Some(PathBuf::from("/pgdata")),
            arclog_path: Some(PathBuf::from("/arclog")),
            srvlog_path: Some(PathBuf::from("/srvlog")),
        }
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.block_size, 8192);
        assert_eq!(config.server.wal_block_size, 8192);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.restore.timeline_boundary, TimelineBoundary::Exclusive);
        assert!(config.restore.exclude.contains(&"pg_xlog".to_string()));
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            backup_path = "/var/lib/backups"
            pgdata = "/var/lib/pgsql/data"

            [server]
            block_size = 16384

            [restore]
            timeline_boundary = "inclusive"
            verify_checksums = true

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.backup_path, Some(PathBuf::from("/var/lib/backups")));
        assert_eq!(config.server.block_size, 16384);
        assert_eq!(config.server.wal_block_size, 8192);
        assert_eq!(config.restore.timeline_boundary, TimelineBoundary::Inclusive);
        assert!(config.restore.verify_checksums);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_missing_path_is_reported_by_name() {
        let mut config = Config::default();
        config.paths = full_paths();
        config.paths.srvlog_path = None;

        match config.resolve() {
            Err(RestoreError::MissingConfig(name)) => assert!(name.contains("SRVLOG_PATH")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut config = Config::default();
        config.paths = full_paths();
        config.paths.pgdata = Some(PathBuf::from("data"));
        assert!(matches!(config.resolve(), Err(RestoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_resolve_appends_log_paths_to_exclusions() {
        let mut config = Config::default();
        config.paths = full_paths();
        let ctx = config.resolve().unwrap();

        assert!(ctx.exclude.contains(&"/arclog".to_string()));
        assert!(ctx.exclude.contains(&"/srvlog".to_string()));
        assert_eq!(ctx.pg_xlog(), PathBuf::from("/pgdata/pg_xlog"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.paths = full_paths();

        let env: HashMap<&str, &str> = [("PGDATA", "/srv/pg"), ("ARCLOG_PATH", "/srv/arc")].into();
        config.apply_env_with(|key| env.get(key).map(PathBuf::from));

        assert_eq!(config.paths.pgdata, Some(PathBuf::from("/srv/pg")));
        assert_eq!(config.paths.arclog_path, Some(PathBuf::from("/srv/arc")));
        assert_eq!(config.paths.backup_path, Some(PathBuf::from("/backup")));
    }
}
