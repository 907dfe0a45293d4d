//! PITR Restore - Main entry point
//!
//! Restores a data directory from the backup catalog and prepares recovery.

use anyhow::Result;
use clap::Parser;
use pitr_restore::config::{Config, CONFIG_FILE_NAME};
use pitr_restore::restore::recovery_conf::RecoveryTarget;
use pitr_restore::utils::{self, Interrupt, RestoreError};
use pitr_restore::{RestoreOptions, RestoreReport, Restorer};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: <backup-path>/pitr-restore.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backup catalog root
    #[arg(short = 'B', long)]
    backup_path: Option<PathBuf>,

    /// Data directory to restore into
    #[arg(short = 'D', long)]
    pgdata: Option<PathBuf>,

    /// Archive directory that recovery reads WAL from
    #[arg(short = 'A', long)]
    arclog_path: Option<PathBuf>,

    /// Server log directory
    #[arg(short = 'S', long)]
    srvlog_path: Option<PathBuf>,

    /// Only validate and report how far recovery can reach; change nothing
    #[arg(short, long)]
    check: bool,

    /// Show progress details (same as --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[arg(long, value_name = "TIMESTAMP")]
    recovery_target_time: Option<String>,

    #[arg(long, value_name = "XID")]
    recovery_target_xid: Option<String>,

    #[arg(long, value_name = "BOOL")]
    recovery_target_inclusive: Option<String>,

    /// Timeline to recover into (default: current, else the latest full backup's)
    #[arg(long, value_name = "TLI", default_value_t = 0)]
    recovery_target_timeline: u32,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let backup_path = self
            .backup_path
            .clone()
            .or_else(|| std::env::var_os("BACKUP_PATH").map(PathBuf::from));

        let mut config = match (&self.config, backup_path) {
            (Some(path), _) => Config::from_file(path)?,
            (None, Some(root)) if root.join(CONFIG_FILE_NAME).is_file() => {
                Config::from_file(&root.join(CONFIG_FILE_NAME))?
            }
            _ => Config::default(),
        };

        config.apply_env();

        let paths = &mut config.paths;
        for (slot, value) in [
            (&mut paths.backup_path, &self.backup_path),
            (&mut paths.pgdata, &self.pgdata),
            (&mut paths.arclog_path, &self.arclog_path),
            (&mut paths.srvlog_path, &self.srvlog_path),
        ] {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        Ok(config)
    }

    fn options(&self) -> RestoreOptions {
        RestoreOptions {
            target: RecoveryTarget {
                time: self.recovery_target_time.clone(),
                xid: self.recovery_target_xid.clone(),
                inclusive: self.recovery_target_inclusive.clone(),
            },
            target_tli: self.recovery_target_timeline,
            dry_run: self.check,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = args.load_config()?;

    // Initialize logging
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(&config.log.level)
    };
    utils::logger::init(log_level)?;

    let interrupt = Interrupt::install()?;

    let ctx = config.resolve().unwrap_or_else(|e| fail(e));
    tracing::debug!("Starting pitr-restore v{}", env!("CARGO_PKG_VERSION"));

    let options = args.options();
    match Restorer::new(&ctx, interrupt).run(&options) {
        Ok(report) => print_report(&report, options.dry_run),
        Err(e) => fail(e),
    }

    Ok(())
}

fn print_report(report: &RestoreReport, dry_run: bool) {
    if dry_run {
        println!("backups to restore:");
        for id in &report.applied {
            println!("  {}", id);
        }
        println!("reachable WAL (timeline {}):", report.target_tli);
        for (dir, run) in &report.wal_runs {
            println!("  {}  ({})", run, dir.display());
        }
        return;
    }

    println!("restore complete. Recovery starts automatically when the PostgreSQL server is started.");
}

/// Log the failure with its category and exit with the matching status.
fn fail(err: RestoreError) -> ! {
    tracing::error!(code = err.code(), "{}", err);
    std::process::exit(err.exit_code());
}
