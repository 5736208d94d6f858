//! API Module - operator surface over a running `TriageService`
//!
//! All commands return `Result<_, String>` so they can be bridged to any
//! transport (CLI, local socket) without leaking internal error types.

pub mod commands;

pub use commands::*;
