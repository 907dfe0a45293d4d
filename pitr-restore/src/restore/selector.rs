//! Choosing which backups rebuild the target.
//!
//! The catalog is newest first. The base is the newest usable full backup;
//! every newer incremental on the same timeline that still lies on the
//! branch is replayed on top of it, oldest first.

use crate::catalog::{Backup, BackupMode, BackupStatus, Catalog};
use crate::utils::errors::{RestoreError, Result};
use crate::wal::history::{TimelineBoundary, TimelineChain};
use crate::wal::TimeLineId;
use tracing::{debug, info, warn};

/// The backups to apply, base first.
#[derive(Debug, Clone)]
pub struct BackupChain<'a> {
    /// Catalog index of the base full backup
    pub base_index: usize,
    /// Base, then incrementals in the order they are applied
    pub members: Vec<&'a Backup>,
    /// Smallest catalog index among the members, i.e. the newest one applied
    pub last_restored_index: usize,
}

impl<'a> BackupChain<'a> {
    pub fn base(&self) -> &'a Backup {
        self.members[0]
    }

    /// The member applied last; its manifest describes the final tree.
    pub fn newest(&self) -> &'a Backup {
        self.members[self.members.len() - 1]
    }
}

/// Pick the base full backup and the incrementals to apply over it.
pub fn select_chain<'a>(
    catalog: &'a Catalog,
    timelines: &TimelineChain,
    boundary: TimelineBoundary,
    compression_supported: bool,
) -> Result<BackupChain<'a>> {
    let backups = catalog.backups();

    let mut base_index = None;
    for (i, backup) in backups.iter().enumerate() {
        if backup.backup_mode < BackupMode::Full || backup.status != BackupStatus::Ok {
            continue;
        }

        if backup.compress_data
            && !compression_supported
            && (backup.has_database() || backup.has_arclog())
        {
            return Err(RestoreError::Unsupported(backup.id()));
        }

        if timelines.satisfies(backup.timeline, backup.stop_lsn, boundary) {
            base_index = Some(i);
            break;
        }
        debug!(backup = %backup.id(), "full backup not on the target branch");
    }

    let base_index = base_index.ok_or(RestoreError::NoBackup)?;
    let base = &backups[base_index];
    info!(backup = %base.id(), stop_lsn = %base.stop_lsn, "base backup selected");

    let mut members = vec![base];
    let mut last_restored_index = base_index;

    for i in (0..base_index).rev() {
        let backup = &backups[i];
        if backup.status != BackupStatus::Ok || backup.timeline != base.timeline {
            continue;
        }
        if backup.backup_mode < BackupMode::Incremental {
            continue;
        }
        if !timelines.satisfies(backup.timeline, backup.stop_lsn, boundary) {
            continue;
        }

        debug!(backup = %backup.id(), stop_lsn = %backup.stop_lsn, "incremental backup selected");
        members.push(backup);
        last_restored_index = i;
    }

    Ok(BackupChain {
        base_index,
        members,
        last_restored_index,
    })
}

/// Catalog indices whose archived WAL is restored, oldest first: everything
/// from the last restored backup up to the newest entry that is OK, carries
/// WAL and lies on the branch. Archive-only backups count; their WAL may span
/// several timelines, so the base timeline is not required.
pub fn archive_sources(
    catalog: &Catalog,
    last_restored_index: usize,
    timelines: &TimelineChain,
    boundary: TimelineBoundary,
) -> Vec<usize> {
    (0..=last_restored_index)
        .rev()
        .filter(|&i| {
            catalog.get(i).is_some_and(|backup| {
                backup.status == BackupStatus::Ok
                    && backup.has_arclog()
                    && timelines.satisfies(backup.timeline, backup.stop_lsn, boundary)
            })
        })
        .collect()
}

/// Timeline of the newest full backup that is OK, or finished and passing
/// size validation. Used when no target timeline can be determined otherwise.
///
/// A finished backup that validates is marked OK in `catalog`, so chain
/// selection can use it as the base.
pub fn latest_full_timeline(catalog: &mut Catalog, verify_checksums: bool) -> Result<TimeLineId> {
    for backup in catalog.backups_mut() {
        if backup.backup_mode < BackupMode::Full {
            continue;
        }
        match backup.status {
            BackupStatus::Ok => return Ok(backup.timeline),
            BackupStatus::Done => match backup.validate(verify_checksums) {
                Ok(()) => {
                    info!(backup = %backup.id(), "finished backup validated");
                    backup.status = BackupStatus::Ok;
                    return Ok(backup.timeline);
                }
                Err(e) => warn!(backup = %backup.id(), error = %e, "unvalidated backup is corrupted"),
            },
            _ => {}
        }
    }
    Err(RestoreError::NoBackup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::{backup, write_files, write_record};
    use crate::wal::history::parse_history;
    use crate::wal::{Lsn, XLOG_SEG_SIZE};
    use std::path::Path;
    use tempfile::TempDir;

    use BackupMode::{Archive, Full, Incremental};
    use BackupStatus::{Done, Error, Ok as Good};

    fn bounded(tli: TimeLineId, end: u32) -> TimelineChain {
        // "<tli> <wal file>" makes `tli` end where that segment starts.
        let seg = end / XLOG_SEG_SIZE;
        let content = format!("{} {}\n", tli, crate::wal::SegmentNo { log_id: 0, seg }.file_name(tli));
        parse_history(&content, tli + 1, Path::new("test.history")).unwrap()
    }

    fn ids(chain: &BackupChain<'_>) -> Vec<u32> {
        chain.members.iter().map(|b| b.stop_lsn.xrecoff).collect()
    }

    #[test]
    fn test_newest_full_with_following_incremental() {
        // Newest first: INCR stop=20, FULL stop=10, FULL stop=5. Timeline 1
        // ends at segment 25, past every stop point.
        let catalog = Catalog::new(vec![
            backup(Incremental, Good, 1, 20, 30),
            backup(Full, Good, 1, 10, 20),
            backup(Full, Good, 1, 5, 10),
        ]);
        let timelines = bounded(1, 25 * XLOG_SEG_SIZE);
        assert_eq!(timelines.len(), 2);

        let chain = select_chain(&catalog, &timelines, TimelineBoundary::Exclusive, true).unwrap();
        assert_eq!(chain.base_index, 1);
        assert_eq!(ids(&chain), vec![10, 20]);
        assert_eq!(chain.last_restored_index, 0);
        assert_eq!(chain.newest().stop_lsn, Lsn::new(0, 20));
    }

    #[test]
    fn test_status_other_than_ok_is_never_selected() {
        let catalog = Catalog::new(vec![
            backup(Incremental, Done, 1, 40, 40),
            backup(Incremental, Error, 1, 30, 30),
            backup(Full, Error, 1, 20, 20),
            backup(Full, Good, 1, 10, 10),
        ]);
        let chain = select_chain(&catalog, &TimelineChain::single(1), TimelineBoundary::Exclusive, true).unwrap();
        assert_eq!(chain.base_index, 3);
        assert_eq!(ids(&chain), vec![10]);
        assert_eq!(chain.last_restored_index, 3);
    }

    #[test]
    fn test_no_full_backup() {
        let catalog = Catalog::new(vec![backup(Incremental, Good, 1, 20, 30), backup(Archive, Good, 1, 5, 10)]);
        assert!(matches!(
            select_chain(&catalog, &TimelineChain::single(1), TimelineBoundary::Exclusive, true),
            Err(RestoreError::NoBackup)
        ));
    }

    #[test]
    fn test_timeline_branch_limits_candidates() {
        // Timeline 1 ended at segment 2; timeline 2 is the target.
        let timelines = bounded(1, 2 * XLOG_SEG_SIZE);
        let end = 2 * XLOG_SEG_SIZE;

        let catalog = Catalog::new(vec![
            backup(Incremental, Good, 2, end + 500, 50),
            backup(Full, Good, 1, end + 100, 40),
            backup(Incremental, Good, 1, end - 100, 30),
            backup(Full, Good, 1, end - 200, 20),
        ]);

        let chain = select_chain(&catalog, &timelines, TimelineBoundary::Exclusive, true).unwrap();
        assert_eq!(chain.base_index, 3);
        // The timeline 2 incremental is not on the base's timeline.
        assert_eq!(ids(&chain), vec![end - 200, end - 100]);
        assert_eq!(chain.last_restored_index, 2);
    }

    #[test]
    fn test_stop_at_boundary_depends_on_mode() {
        let end = 2 * XLOG_SEG_SIZE;
        let timelines = bounded(1, end);
        let catalog = Catalog::new(vec![backup(Full, Good, 1, end, 10)]);

        assert!(matches!(
            select_chain(&catalog, &timelines, TimelineBoundary::Exclusive, true),
            Err(RestoreError::NoBackup)
        ));
        let chain = select_chain(&catalog, &timelines, TimelineBoundary::Inclusive, true).unwrap();
        assert_eq!(chain.base_index, 0);
    }

    #[test]
    fn test_compressed_base_without_support() {
        let mut compressed = backup(Full, Good, 1, 10, 10);
        compressed.compress_data = true;
        let catalog = Catalog::new(vec![compressed.clone()]);

        assert!(matches!(
            select_chain(&catalog, &TimelineChain::single(1), TimelineBoundary::Exclusive, false),
            Err(RestoreError::Unsupported(_))
        ));
        assert!(select_chain(&catalog, &TimelineChain::single(1), TimelineBoundary::Exclusive, true).is_ok());
    }

    #[test]
    fn test_archive_sources_include_archive_only_backups() {
        let timelines = bounded(1, 4 * XLOG_SEG_SIZE);
        let catalog = Catalog::new(vec![
            backup(Archive, Good, 2, 900, 60),
            backup(Archive, Error, 1, 800, 50),
            backup(Archive, Good, 1, 700, 40),
            backup(Incremental, Good, 1, 600, 30),
            backup(Full, Good, 1, 500, 20),
            backup(Archive, Good, 1, 400, 10),
        ]);

        let chain = select_chain(&catalog, &timelines, TimelineBoundary::Exclusive, true).unwrap();
        assert_eq!(chain.last_restored_index, 3);

        let sources = archive_sources(&catalog, chain.last_restored_index, &timelines, TimelineBoundary::Exclusive);
        assert_eq!(sources, vec![3, 2, 0]);
    }

    #[test]
    fn test_latest_full_timeline() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let unvalidated = write_record(root, &backup(Full, Done, 3, 30, 30))?;
        write_files(&unvalidated, false, &[("PG_VERSION", Some(b"8.4\n"))])?;
        write_files(&unvalidated, true, &[])?;
        let mut catalog = Catalog::new(vec![unvalidated.clone(), backup(Full, Good, 2, 20, 20)]);
        assert_eq!(latest_full_timeline(&mut catalog, false).unwrap(), 3);
        assert_eq!(catalog.backups()[0].status, Good);

        std::fs::write(unvalidated.database_dir().join("PG_VERSION"), b"truncated")?;
        let mut catalog = Catalog::new(vec![unvalidated.clone(), backup(Full, Good, 2, 20, 20)]);
        assert_eq!(latest_full_timeline(&mut catalog, false).unwrap(), 2);
        assert_eq!(catalog.backups()[0].status, Done);

        let mut catalog = Catalog::new(vec![backup(Incremental, Good, 1, 20, 20)]);
        assert!(matches!(latest_full_timeline(&mut catalog, false), Err(RestoreError::NoBackup)));
        Ok(())
    }

    #[test]
    fn test_validated_finished_backup_becomes_the_base() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let finished = write_record(root, &backup(Full, Done, 3, 30, 30))?;
        write_files(&finished, false, &[("PG_VERSION", Some(b"8.4\n"))])?;
        write_files(&finished, true, &[])?;
        let mut catalog = Catalog::new(vec![finished, backup(Full, Good, 2, 20, 20)]);

        let tli = latest_full_timeline(&mut catalog, false).unwrap();
        let chain = select_chain(&catalog, &TimelineChain::single(tli), TimelineBoundary::Exclusive, true).unwrap();
        assert_eq!(chain.base_index, 0);
        assert_eq!(chain.base().timeline, 3);
        Ok(())
    }
}
