//! Utility modules for the restore tool.

pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{IoContext, RestoreError, Result};
pub use shutdown::Interrupt;
