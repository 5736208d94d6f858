//! Vault Types
//!
//! `VaultEntry` and its append-only transition history, errors and config.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaultState {
    Quarantined,
    Restored,
    Purged,
}

impl VaultState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultState::Quarantined => "quarantined",
            VaultState::Restored => "restored",
            VaultState::Purged => "purged",
        }
    }

    pub fn can_transition_to(&self, next: VaultState) -> bool {
        matches!(
            (self, next),
            (VaultState::Quarantined, VaultState::Restored)
                | (VaultState::Quarantined, VaultState::Purged)
                | (VaultState::Restored, VaultState::Purged)
        )
    }
}

impl std::fmt::Display for VaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an artifact was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureReason {
    /// Risky verdict: quarantine copy, operation allowed
    RiskyArtifact,
    /// Process contained: lookback or blocked artifact
    Containment,
    /// Pre-modification copy for an escalated process
    Snapshot,
    /// Explicit operator request
    Operator,
}

impl CaptureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureReason::RiskyArtifact => "risky_artifact",
            CaptureReason::Containment => "containment",
            CaptureReason::Snapshot => "snapshot",
            CaptureReason::Operator => "operator",
        }
    }
}

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultTransition {
    pub state: VaultState,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: Uuid,
    pub original_path: PathBuf,
    pub store_path: PathBuf,
    /// Hex SHA-256 of the content at capture time
    pub sha256: String,
    pub size: u64,
    pub captured_at: DateTime<Utc>,
    pub pid: u32,
    pub reason: CaptureReason,
    /// Oldest first; never rewritten
    pub history: Vec<VaultTransition>,
}

impl VaultEntry {
    pub fn state(&self) -> VaultState {
        self.history
            .last()
            .map(|t| t.state)
            .unwrap_or(VaultState::Quarantined)
    }

    pub fn file_name(&self) -> String {
        self.original_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault entry not found: {0}")]
    NotFound(Uuid),

    #[error("hash mismatch for {path}: expected {expected}, found {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("vault {op} failed on {path}: {source}")]
    IoFailure {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is in use by monitored process {pid}")]
    PathInUse { path: PathBuf, pid: u32 },

    #[error("entry {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: VaultState,
        to: VaultState,
    },

    #[error("vault store full: {needed} bytes needed, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },
}

impl VaultError {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        VaultError::IoFailure {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// RESTORE OWNERSHIP
// ============================================================================

/// Answers whether a path is held by a live monitored process other than
/// the one that caused the capture.
pub trait PathOwnership {
    fn owner_of(&self, path: &Path, capturing_pid: u32) -> Option<u32>;
}

/// No monitored processes (offline tools, tests)
pub struct NoOwnership;

impl PathOwnership for NoOwnership {
    fn owner_of(&self, _path: &Path, _capturing_pid: u32) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreMode {
    /// Refuse if the original path holds content other than what was captured
    Strict,
    /// Replace whatever is at the original path (rollback after tampering)
    Overwrite,
}

// ============================================================================
// CONFIG + STATS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Defaults to `<data_dir>/vault`
    pub dir: Option<PathBuf>,
    pub max_store_mb: u64,
    /// Entries older than this are purged by the maintenance sweep
    pub retention_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_store_mb: 500,
            retention_secs: 30 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultStats {
    pub total_entries: usize,
    pub quarantined: usize,
    pub restored: usize,
    pub purged: usize,
    pub store_bytes: u64,
    pub limit_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_forward() {
        use VaultState::*;
        assert!(Quarantined.can_transition_to(Restored));
        assert!(Quarantined.can_transition_to(Purged));
        assert!(Restored.can_transition_to(Purged));
        assert!(!Restored.can_transition_to(Quarantined));
        assert!(!Purged.can_transition_to(Restored));
        assert!(!Purged.can_transition_to(Purged));
    }
}
