//! WAL positions, segment numbering and file naming.
//!
//! A WAL file is named `TTTTTTTTXXXXXXXXSSSSSSSS`: timeline, log id and
//! segment number, each as 8 upper-case hex digits.

pub mod continuity;
pub mod history;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of one WAL segment file.
pub const XLOG_SEG_SIZE: u32 = 16 * 1024 * 1024;

/// Segments per log id; the last slot of each log id is never used.
pub const XLOG_SEGS_PER_FILE: u32 = u32::MAX / XLOG_SEG_SIZE;

/// Directory holding the server's live WAL inside the data directory.
pub const PG_XLOG_DIR: &str = "pg_xlog";

/// Suffix of timeline history files.
pub const HISTORY_SUFFIX: &str = ".history";

pub type TimeLineId = u32;

/// Log sequence number: a log id and a byte offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lsn {
    pub xlogid: u32,
    pub xrecoff: u32,
}

impl Lsn {
    pub const fn new(xlogid: u32, xrecoff: u32) -> Self {
        Self { xlogid, xrecoff }
    }

    /// Segment containing this position.
    pub fn segment(&self) -> SegmentNo {
        SegmentNo {
            log_id: self.xlogid,
            seg: self.xrecoff / XLOG_SEG_SIZE,
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:08X}", self.xlogid, self.xrecoff)
    }
}

impl FromStr for Lsn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("invalid LSN \"{}\"", s))?;
        let xlogid = u32::from_str_radix(hi, 16).map_err(|e| format!("invalid LSN \"{}\": {}", s, e))?;
        let xrecoff = u32::from_str_radix(lo, 16).map_err(|e| format!("invalid LSN \"{}\": {}", s, e))?;
        Ok(Lsn { xlogid, xrecoff })
    }
}

impl TryFrom<String> for Lsn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Lsn> for String {
    fn from(lsn: Lsn) -> Self {
        lsn.to_string()
    }
}

/// Position of a WAL segment file in the stream, independent of timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SegmentNo {
    pub log_id: u32,
    pub seg: u32,
}

impl SegmentNo {
    /// The segment after this one, rolling over into the next log id.
    pub fn next(self) -> Self {
        if self.seg >= XLOG_SEGS_PER_FILE - 1 {
            SegmentNo {
                log_id: self.log_id.wrapping_add(1),
                seg: 0,
            }
        } else {
            SegmentNo {
                log_id: self.log_id,
                seg: self.seg + 1,
            }
        }
    }

    /// File name of this segment on the given timeline.
    pub fn file_name(&self, tli: TimeLineId) -> String {
        format!("{:08X}{:08X}{:08X}", tli, self.log_id, self.seg)
    }
}

/// `<tli>.history` file name.
pub fn history_file_name(tli: TimeLineId) -> String {
    format!("{:08X}{}", tli, HISTORY_SUFFIX)
}

pub fn is_history_file(name: &str) -> bool {
    name.ends_with(HISTORY_SUFFIX)
}

/// Parse the leading 24 hex digits of a WAL file name into the LSN at the
/// start of that segment. Anything after the 24th digit is ignored.
pub fn parse_wal_file_name(name: &str) -> Option<(TimeLineId, Lsn)> {
    let head = name.get(..24)?;
    if !head.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let tli = u32::from_str_radix(&head[0..8], 16).ok()?;
    let xlogid = u32::from_str_radix(&head[8..16], 16).ok()?;
    let seg = u32::from_str_radix(&head[16..24], 16).ok()?;
    let xrecoff = seg.checked_mul(XLOG_SEG_SIZE)?;
    Some((tli, Lsn { xlogid, xrecoff }))
}
