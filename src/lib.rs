//! CURA Core - host threat triage
//!
//! Kernel file/process/network events are scored, classified and
//! arbitrated into one verdict each; risky artifacts are captured into a
//! recoverable vault.

pub mod constants;
pub mod logic;
pub mod api;
