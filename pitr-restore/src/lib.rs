//! PITR Restore Library
//!
//! Rebuilds a PostgreSQL data directory and its archived WAL from a catalog of
//! full, incremental and archive-only backups, following the timeline branch
//! that leads to the recovery target.

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod fs;
pub mod restore;
pub mod utils;
pub mod wal;

// Re-export commonly used types
pub use config::{Config, RestoreContext};
pub use restore::{RestoreOptions, RestoreReport, Restorer};
pub use utils::errors::{RestoreError, Result};
