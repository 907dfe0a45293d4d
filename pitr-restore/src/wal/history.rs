//! Timeline history resolution.
//!
//! A `<tli>.history` file lists the ancestors of timeline `tli`, one per line:
//! `<parent tli> <WAL file where the parent ended> [comment]`. Resolving a
//! target timeline yields the single branch leading from the root timeline
//! down to it.

use super::{history_file_name, parse_wal_file_name, Lsn, TimeLineId};
use crate::utils::errors::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One timeline on the branch, with the position where its child forked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    pub tli: TimeLineId,
    /// `None` for the target timeline, which has no known child.
    pub end: Option<Lsn>,
}

/// How a backup stop position is compared with a timeline's end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineBoundary {
    /// `stop_lsn < end`
    #[default]
    Exclusive,
    /// `stop_lsn <= end`
    Inclusive,
}

impl Timeline {
    pub fn admits(&self, stop_lsn: Lsn, boundary: TimelineBoundary) -> bool {
        match (self.end, boundary) {
            (None, _) => true,
            (Some(end), TimelineBoundary::Exclusive) => stop_lsn < end,
            (Some(end), TimelineBoundary::Inclusive) => stop_lsn <= end,
        }
    }
}

/// Branch of timelines from the root down to the target, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineChain {
    entries: Vec<Timeline>,
}

impl TimelineChain {
    /// A chain made of the target alone, for timelines without a history file.
    pub fn single(target: TimeLineId) -> Self {
        Self {
            entries: vec![Timeline { tli: target, end: None }],
        }
    }

    /// Root-first entries; the last one is the target.
    pub fn entries(&self) -> &[Timeline] {
        &self.entries
    }

    /// Target first, then each ancestor back to the root.
    pub fn newest_first(&self) -> impl Iterator<Item = &Timeline> {
        self.entries.iter().rev()
    }

    pub fn target(&self) -> TimeLineId {
        self.entries.last().map(|t| t.tli).unwrap_or_default()
    }

    pub fn get(&self, tli: TimeLineId) -> Option<&Timeline> {
        self.entries.iter().find(|t| t.tli == tli)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when a backup taken on `tli` and stopping at `stop_lsn` lies on
    /// this branch before the branch left that timeline.
    pub fn satisfies(&self, tli: TimeLineId, stop_lsn: Lsn, boundary: TimelineBoundary) -> bool {
        self.entries
            .iter()
            .any(|t| t.tli == tli && t.admits(stop_lsn, boundary))
    }
}

/// Locations searched for `<tli>.history`, in order.
#[derive(Debug, Clone)]
pub struct HistorySources {
    pub dirs: Vec<PathBuf>,
}

impl HistorySources {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Build the branch for `target`. A missing history file means the target
    /// has no recorded parent.
    pub fn resolve(&self, target: TimeLineId) -> Result<TimelineChain> {
        let file_name = history_file_name(target);

        for dir in &self.dirs {
            let path = dir.join(&file_name);
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let chain = parse_history(&content, target, &path)?;
                    for (i, t) in chain.entries().iter().enumerate() {
                        debug!(index = i, tli = t.tli, end = ?t.end, "timeline branch");
                    }
                    return Ok(chain);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(RestoreError::io("open history file", &path, e)),
            }
        }

        debug!(tli = target, "no history file, timeline has no parent");
        Ok(TimelineChain::single(target))
    }
}

/// Parse the text of a history file for timeline `target`.
pub fn parse_history(content: &str, target: TimeLineId, path: &Path) -> Result<TimelineChain> {
    let corrupted = |reason: String| RestoreError::CorruptedHistory {
        path: path.to_path_buf(),
        reason,
    };

    let mut entries: Vec<Timeline> = Vec::new();

    for line in content.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (tli, rest) = parse_c_ulong(line)
            .ok_or_else(|| corrupted(format!("syntax error(timeline ID) in line: {}", line)))?;

        if let Some(last) = entries.last() {
            if tli <= last.tli {
                return Err(corrupted("Timeline IDs must be in increasing sequence".to_string()));
            }
        }

        let rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with('#') {
            return Err(corrupted("End logfile must follow Timeline ID".to_string()));
        }

        let (_, end) = parse_wal_file_name(rest)
            .ok_or_else(|| corrupted(format!("syntax error(endfname) in line: {}", line)))?;

        entries.push(Timeline { tli, end: Some(end) });
    }

    if let Some(last) = entries.last() {
        if target <= last.tli {
            return Err(corrupted(
                "Timeline IDs must be less than child timeline's ID".to_string(),
            ));
        }
    }

    entries.push(Timeline { tli: target, end: None });
    Ok(TimelineChain { entries })
}

/// `strtoul(s, &end, 0)` for timeline ids: `0x` prefix is hex, a leading `0`
/// is octal, anything else decimal. Returns the value and the unparsed rest.
fn parse_c_ulong(s: &str) -> Option<(u32, &str)> {
    let (radix, digits) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.starts_with(|c: char| c.is_ascii_hexdigit()) {
            (16, hex)
        } else {
            (8, s)
        }
    } else if s.starts_with('0') {
        (8, s)
    } else {
        (10, s)
    };

    let len = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if len == 0 {
        return None;
    }

    let value = u32::from_str_radix(&digits[..len], radix).ok()?;
    Some((value, &digits[len..]))
}
