//! Vault Module - Snapshot / quarantine store
//!
//! ## Structure
//! - `types`: `VaultEntry`, `VaultState`, `VaultError`, ownership trait
//! - `journal`: CRC-protected append-only journal
//! - `manager`: `VaultManager` (capture, restore, purge, retention)

pub mod types;
pub mod journal;
pub mod manager;

pub use types::{
    CaptureReason, NoOwnership, PathOwnership, RestoreMode, VaultConfig, VaultEntry, VaultError,
    VaultState, VaultStats, VaultTransition,
};
pub use manager::{hash_file, VaultManager};
