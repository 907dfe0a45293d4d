//! State of the database cluster being restored into.

pub mod control;
pub mod postmaster;
