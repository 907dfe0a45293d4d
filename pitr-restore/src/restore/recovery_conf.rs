//! `recovery.conf` generation.

use crate::utils::errors::{IoContext, Result};
use crate::wal::TimeLineId;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const RECOVERY_CONF_FILE: &str = "recovery.conf";

/// Where recovery should stop. Values are passed through to the server as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryTarget {
    pub time: Option<String>,
    pub xid: Option<String>,
    pub inclusive: Option<String>,
}

pub fn render(arclog_path: &Path, target: &RecoveryTarget, timeline: TimeLineId) -> String {
    let mut conf = String::new();
    let _ = writeln!(
        conf,
        "# recovery.conf generated by {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(conf, "restore_command = 'cp {}/%f %p'", arclog_path.display());
    if let Some(time) = &target.time {
        let _ = writeln!(conf, "recovery_target_time = '{}'", time);
    }
    if let Some(xid) = &target.xid {
        let _ = writeln!(conf, "recovery_target_xid = '{}'", xid);
    }
    if let Some(inclusive) = &target.inclusive {
        let _ = writeln!(conf, "recovery_target_inclusive = '{}'", inclusive);
    }
    let _ = writeln!(conf, "recovery_target_timeline = '{}'", timeline);
    conf
}

/// Write `<pgdata>/recovery.conf`, replacing any previous one.
pub fn write(pgdata: &Path, arclog_path: &Path, target: &RecoveryTarget, timeline: TimeLineId) -> Result<PathBuf> {
    let path = pgdata.join(RECOVERY_CONF_FILE);
    std::fs::write(&path, render(arclog_path, target, timeline)).with_path("write", &path)?;
    Ok(path)
}
