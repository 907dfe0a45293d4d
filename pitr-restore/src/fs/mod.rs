//! File system helpers shared by the restore steps.

pub mod copy;
pub mod metadata;
pub mod walker;
