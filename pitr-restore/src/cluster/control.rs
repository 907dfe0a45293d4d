//! Reading the current timeline from `global/pg_control`.
//!
//! The control file is a fixed-size binary record whose layout depends on the
//! server build. Decoding sits behind [`ControlFileDecoder`]; the default
//! decoder only needs three offsets and the record size, all configurable.

use crate::wal::TimeLineId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

pub const CONTROL_FILE_PATH: &str = "global/pg_control";

/// Where the fields restore cares about live in the control record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFileLayout {
    /// Bytes read from the start of the file
    #[serde(default = "default_size")]
    pub size: usize,
    /// `pg_control_version`, a native-endian u32
    #[serde(default = "default_version_offset")]
    pub version_offset: usize,
    /// `checkPointCopy.ThisTimeLineID`
    #[serde(default = "default_timeline_offset")]
    pub timeline_offset: usize,
    /// CRC-32 over every byte before this offset, stored at this offset
    #[serde(default = "default_crc_offset")]
    pub crc_offset: usize,
}

fn default_size() -> usize {
    148
}

fn default_version_offset() -> usize {
    8
}

fn default_timeline_offset() -> usize {
    56
}

fn default_crc_offset() -> usize {
    144
}

impl Default for ControlFileLayout {
    fn default() -> Self {
        Self {
            size: default_size(),
            version_offset: default_version_offset(),
            timeline_offset: default_timeline_offset(),
            crc_offset: default_crc_offset(),
        }
    }
}

/// What a decoder could make of the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlData {
    pub timeline: Option<TimeLineId>,
    pub crc_valid: bool,
    /// False when the version field looks byte-swapped
    pub layout_valid: bool,
}

impl ControlData {
    pub fn usable_timeline(&self) -> Option<TimeLineId> {
        if self.crc_valid && self.layout_valid {
            self.timeline
        } else {
            None
        }
    }
}

pub trait ControlFileDecoder {
    fn decode(&self, raw: &[u8]) -> ControlData;
}

/// Decoder driven by a [`ControlFileLayout`], reading native-endian fields.
#[derive(Debug, Clone, Default)]
pub struct LayoutDecoder {
    layout: ControlFileLayout,
}

impl LayoutDecoder {
    pub fn new(layout: ControlFileLayout) -> Self {
        Self { layout }
    }
}

fn read_u32(raw: &[u8], offset: usize) -> Option<u32> {
    let bytes = raw.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

impl ControlFileDecoder for LayoutDecoder {
    fn decode(&self, raw: &[u8]) -> ControlData {
        let layout = &self.layout;

        // A truncated record can't be trusted at all.
        let Some(raw) = raw.get(..layout.size) else {
            return ControlData {
                timeline: None,
                crc_valid: false,
                layout_valid: false,
            };
        };

        let crc_valid = match (raw.get(..layout.crc_offset), read_u32(raw, layout.crc_offset)) {
            (Some(covered), Some(stored)) => crc32fast::hash(covered) == stored,
            _ => false,
        };

        // A byte-swapped version shows up as a multiple of 65536.
        let layout_valid = match read_u32(raw, layout.version_offset) {
            Some(version) => !(version % 65536 == 0 && version / 65536 != 0),
            None => false,
        };

        ControlData {
            timeline: read_u32(raw, layout.timeline_offset),
            crc_valid,
            layout_valid,
        }
    }
}

/// Timeline the cluster in `pgdata` was last running on, or 0 when it can't
/// be determined. Never fails; problems are logged as warnings.
pub fn current_timeline(pgdata: &Path, decoder: &dyn ControlFileDecoder) -> TimeLineId {
    let path = pgdata.join(CONTROL_FILE_PATH);
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no control file");
            return 0;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "can't read control file");
            return 0;
        }
    };

    let data = decoder.decode(&raw);
    if !data.crc_valid {
        warn!(path = %path.display(), "control file has a bad CRC, current timeline unknown");
        return 0;
    }
    if !data.layout_valid {
        warn!(path = %path.display(), "control file byte order mismatch, current timeline unknown");
        return 0;
    }
    data.usable_timeline().unwrap_or(0)
}
