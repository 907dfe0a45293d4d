//! Restore orchestration.
//!
//! Ties the restore steps together in order:
//! - lock the catalog and make sure the server is down
//! - decide the target timeline and resolve its branch
//! - save live WAL, clear the data directory
//! - apply the backup chain, prune, restore archived WAL
//! - put live WAL back and write `recovery.conf`
//!
//! A dry run walks the same path but only validates, then reports how far
//! the available WAL reaches.

pub mod archive;
pub mod online;
pub mod recovery_conf;
pub mod selector;
pub mod sync;

use crate::catalog::lock::CatalogLock;
use crate::catalog::manifest::Manifest;
use crate::catalog::{Catalog, TIMELINE_HISTORY_DIR};
use crate::cluster::control::{current_timeline, ControlFileDecoder, LayoutDecoder};
use crate::cluster::postmaster;
use crate::config::RestoreContext;
use crate::fs::copy::{copy_file, CopyMode};
use crate::fs::walker::{delete_entry, sort_path_desc, walk_directory, WalkOptions};
use crate::utils::errors::{IoContext, Result};
use crate::utils::shutdown::Interrupt;
use crate::wal::continuity::{ContinuityChecker, WalRun};
use crate::wal::history::HistorySources;
use crate::wal::TimeLineId;
use archive::ArchiveRestorer;
use online::{OnlineState, Preserved};
use recovery_conf::RecoveryTarget;
use std::path::{Path, PathBuf};
use sync::FileSynchronizer;
use tracing::{debug, info};

/// What the operator asked for.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub target: RecoveryTarget,
    /// 0 picks the current timeline, or the latest full backup's
    pub target_tli: TimeLineId,
    /// Validate and report without touching anything
    pub dry_run: bool,
}

/// Outcome of a restore run.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub current_tli: TimeLineId,
    pub backup_tli: TimeLineId,
    pub target_tli: TimeLineId,
    pub timelines: Vec<TimeLineId>,
    /// Applied backups, base first
    pub applied: Vec<String>,
    /// Backups whose archived WAL was restored
    pub archive_sources: Vec<String>,
    pub online_wal: Option<Preserved>,
    pub files_restored: usize,
    pub files_deleted: usize,
    pub wal_restored: usize,
    pub online_wal_replayed: usize,
    /// Dry run only: contiguous WAL found in each searched directory
    pub wal_runs: Vec<(PathBuf, WalRun)>,
    pub recovery_conf: Option<PathBuf>,
}

pub struct Restorer<'a> {
    ctx: &'a RestoreContext,
    interrupt: Interrupt,
    decoder: Box<dyn ControlFileDecoder>,
}

impl<'a> Restorer<'a> {
    pub fn new(ctx: &'a RestoreContext, interrupt: Interrupt) -> Self {
        Self {
            ctx,
            interrupt,
            decoder: Box::new(LayoutDecoder::new(ctx.control_file.clone())),
        }
    }

    /// Use a different control file decoder, e.g. for another server version.
    pub fn with_decoder(mut self, decoder: Box<dyn ControlFileDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn run(&self, options: &RestoreOptions) -> Result<RestoreReport> {
        let ctx = self.ctx;
        let dry_run = options.dry_run;
        let mut report = RestoreReport::default();

        info!(pgdata = %ctx.pgdata.display(), dry_run, "restore start");

        let _lock = CatalogLock::acquire(&ctx.backup_path)?;
        postmaster::ensure_stopped(&ctx.pgdata)?;

        let mut catalog = Catalog::load(&ctx.backup_path)?;

        report.current_tli = current_timeline(&ctx.pgdata, self.decoder.as_ref());
        report.backup_tli = selector::latest_full_timeline(&mut catalog, ctx.verify_checksums)?;
        report.target_tli = match options.target_tli {
            0 if report.current_tli != 0 => report.current_tli,
            0 => report.backup_tli,
            tli => tli,
        };
        info!(
            current = report.current_tli,
            latest_full = report.backup_tli,
            target = report.target_tli,
            "timelines"
        );

        let online = OnlineState::new(ctx);
        if !dry_run {
            let re_recovery = report.current_tli != 0 && report.current_tli != report.backup_tli;
            report.online_wal = Some(online.preserve(ctx, re_recovery)?);
            clear_directory(&ctx.pgdata)?;
        }

        let history_dir = ctx.backup_path.join(TIMELINE_HISTORY_DIR);
        let mut history_dirs = vec![ctx.arclog_path.clone(), online.saved_wal_dir().to_path_buf()];
        if dry_run {
            history_dirs.insert(0, history_dir);
        } else {
            self.restore_history_files(&history_dir)?;
        }
        let timelines = HistorySources::new(history_dirs).resolve(report.target_tli)?;
        report.timelines = timelines.entries().iter().map(|t| t.tli).collect();

        let chain = selector::select_chain(&catalog, &timelines, ctx.timeline_boundary, ctx.compression_supported)?;

        let synchronizer = FileSynchronizer::new(ctx, &self.interrupt, dry_run);
        for backup in &chain.members {
            let stats = synchronizer.apply(backup)?;
            report.files_restored += stats.files_restored;
            report.applied.push(backup.id());
        }

        let final_manifest = Manifest::load(&chain.newest().database_file_list())?;
        report.files_deleted = synchronizer.reconcile(&final_manifest)?;
        synchronizer.remove_pid_file()?;

        let mut checker = dry_run.then(|| {
            let start = catalog.backups()[chain.last_restored_index].start_lsn;
            ContinuityChecker::new(start, &timelines)
        });

        let archiver = ArchiveRestorer::new(ctx, &self.interrupt, dry_run);
        for index in selector::archive_sources(&catalog, chain.last_restored_index, &timelines, ctx.timeline_boundary) {
            let backup = &catalog.backups()[index];
            let stats = archiver.restore(backup)?;
            report.wal_restored += stats.restored();
            report.archive_sources.push(backup.id());

            if let Some(checker) = checker.as_mut() {
                scan(checker, &backup.arclog_dir(), &mut report);
            }
        }

        if dry_run {
            if let Some(checker) = checker.as_mut() {
                scan(checker, &ctx.arclog_path, &mut report);
                scan(checker, &ctx.pg_xlog(), &mut report);
                debug!(next = ?checker.next_segment(), "first missing segment");
            }
        } else {
            report.online_wal_replayed = online.replay(ctx)?;
            report.recovery_conf = Some(recovery_conf::write(
                &ctx.pgdata,
                &ctx.arclog_path,
                &options.target,
                report.target_tli,
            )?);
        }

        info!(
            backups = report.applied.len(),
            files = report.files_restored,
            deleted = report.files_deleted,
            wal = report.wal_restored,
            "restore finished"
        );
        Ok(report)
    }

    /// Copy `<backup_path>/timeline_history/*` into the archive directory.
    fn restore_history_files(&self, history_dir: &Path) -> Result<usize> {
        let arclog = &self.ctx.arclog_path;
        std::fs::create_dir_all(arclog).with_path("create directory", arclog)?;

        let mut copied = 0;
        for file in walk_directory(history_dir, &WalkOptions::default()).with_path("list", history_dir)? {
            self.interrupt.check("restore timeline history")?;
            if file.is_dir {
                continue;
            }
            let to = arclog.join(&file.relative_path);
            copy_file(&file.path, &to, CopyMode::Plain).with_path("copy history file to", &to)?;
            copied += 1;
        }

        debug!(files = copied, "timeline history restored");
        Ok(copied)
    }
}

fn scan(checker: &mut ContinuityChecker, dir: &Path, report: &mut RestoreReport) {
    if let Some(run) = checker.scan(dir) {
        report.wal_runs.push((dir.to_path_buf(), run));
    }
}

/// Remove everything under `dir`, leaf first, without following links. The
/// directory itself is kept.
pub fn clear_directory(dir: &Path) -> Result<usize> {
    let mut files = walk_directory(dir, &WalkOptions::default()).with_path("list", dir)?;
    sort_path_desc(&mut files);

    for file in &files {
        delete_entry(&file.path).with_path("delete", &file.path)?;
    }
    info!(dir = %dir.display(), entries = files.len(), "restore destination cleared");
    Ok(files.len())
}
