//! WAL continuity check for dry runs.
//!
//! Starting from the segment where the last restored backup began, walk the
//! segment numbers forward through each WAL directory and report how far an
//! unbroken sequence reaches. Timelines are tried target first; once a segment
//! is found on some timeline, older timelines are dropped for good.

use super::history::{Timeline, TimelineChain};
use super::{Lsn, SegmentNo};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A contiguous run of WAL files found in one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRun {
    pub first: String,
    pub last: String,
    pub count: usize,
}

impl fmt::Display for WalRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count > 1 {
            write!(f, "{} - {}", self.first, self.last)
        } else {
            write!(f, "{}", self.first)
        }
    }
}

pub struct ContinuityChecker {
    next: SegmentNo,
    /// Target first; entries after the last hit are truncated away.
    timelines: Vec<Timeline>,
}

impl ContinuityChecker {
    pub fn new(start_lsn: Lsn, chain: &TimelineChain) -> Self {
        Self {
            next: start_lsn.segment(),
            timelines: chain.newest_first().copied().collect(),
        }
    }

    /// The first segment not yet found.
    pub fn next_segment(&self) -> SegmentNo {
        self.next
    }

    /// Timelines still under consideration, target first.
    pub fn remaining_timelines(&self) -> &[Timeline] {
        &self.timelines
    }

    /// Advance through `dir` as far as segments are present.
    pub fn scan(&mut self, dir: &Path) -> Option<WalRun> {
        let mut run: Option<WalRun> = None;

        loop {
            let hit = self.timelines.iter().enumerate().find_map(|(i, timeline)| {
                let name = self.next.file_name(timeline.tli);
                dir.join(&name).exists().then_some((i, name))
            });

            let Some((index, name)) = hit else {
                break;
            };

            match run.as_mut() {
                Some(r) => {
                    r.last = name;
                    r.count += 1;
                }
                None => {
                    run = Some(WalRun {
                        first: name.clone(),
                        last: name,
                        count: 1,
                    })
                }
            }

            self.timelines.truncate(index + 1);
            self.next = self.next.next();
        }

        debug!(dir = %dir.display(), run = ?run, next = ?self.next, "WAL continuity scan");
        run
    }
}
