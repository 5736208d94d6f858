//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema shared with the scoring models.**
//!
//! ## Rules:
//! 1. Add feature → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove feature → increment FEATURE_VERSION
//!
//! ONNX models ship a sidecar with the version/hash they were trained on;
//! a mismatch refuses the model.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// FEATURE LAYOUT (Authoritative source)
// ============================================================================

/// Feature names in exact order they appear in the record. All values are in [0, 1].
pub const FEATURE_LAYOUT: &[&str] = &[
    "event_weight",        // 0: Base risk of the operation kind
    "extension_risk",      // 1: Executable/script/encrypted/double extension
    "name_entropy",        // 2: Shannon entropy of the file name (normalized)
    "sensitive_dir",       // 3: Path under a sensitive directory
    "protected_target",    // 4: Path matches an operator protected pattern
    "suspicious_image",    // 5: Known-bad name fragment in path
    "context_entropy",     // 6: Shannon entropy of the context blob (normalized)
    "file_size",           // 7: log10(size + 1) / 10
    "temp_or_hidden",      // 8: Temp directory or hidden file
    "path_depth",          // 9: Directory depth / 32
    "network",             // 10: Network operation
    "metadata_missing",    // 11: Degraded record (extraction failed)
];

/// Total number of features
pub const FEATURE_COUNT: usize = 12;

pub const IDX_EVENT_WEIGHT: usize = 0;
pub const IDX_EXTENSION_RISK: usize = 1;
pub const IDX_NAME_ENTROPY: usize = 2;
pub const IDX_SENSITIVE_DIR: usize = 3;
pub const IDX_PROTECTED_TARGET: usize = 4;
pub const IDX_SUSPICIOUS_IMAGE: usize = 5;
pub const IDX_CONTEXT_ENTROPY: usize = 6;
pub const IDX_FILE_SIZE: usize = 7;
pub const IDX_TEMP_OR_HIDDEN: usize = 8;
pub const IDX_PATH_DEPTH: usize = 9;
pub const IDX_NETWORK: usize = 10;
pub const IDX_METADATA_MISSING: usize = 11;

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 of version + ordered feature names
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);

    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }

    hasher.finalize()
}

/// Layout information for model sidecars and status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub feature_count: usize,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
            feature_count: FEATURE_COUNT,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("feature layout mismatch: expected v{expected_version} ({expected_hash:08x}), got v{actual_version} ({actual_hash:08x})")]
pub struct LayoutMismatchError {
    pub expected_version: u8,
    pub expected_hash: u32,
    pub actual_version: u8,
    pub actual_hash: u32,
}

/// Validate that a model was trained on the current layout
pub fn validate_layout(version: u8, hash: u32) -> Result<(), LayoutMismatchError> {
    let current = layout_hash();
    if version != FEATURE_VERSION || hash != current {
        return Err(LayoutMismatchError {
            expected_version: FEATURE_VERSION,
            expected_hash: current,
            actual_version: version,
            actual_hash: hash,
        });
    }
    Ok(())
}

pub fn feature_name(index: usize) -> Option<&'static str> {
    FEATURE_LAYOUT.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
        assert_eq!(feature_name(IDX_METADATA_MISSING), Some("metadata_missing"));
    }

    #[test]
    fn test_validate_layout() {
        assert!(validate_layout(FEATURE_VERSION, layout_hash()).is_ok());
        assert!(validate_layout(FEATURE_VERSION + 1, layout_hash()).is_err());
        assert!(validate_layout(FEATURE_VERSION, layout_hash() ^ 1).is_err());
    }
}
