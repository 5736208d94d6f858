//! Central Configuration Constants
//!
//! Single source of truth for defaults that are not part of `AgentConfig`
//! sections, plus helpers that read the `CURA_*` environment overrides.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "CURA Core";

/// Folder under the local data dir
pub const DATA_DIR_NAME: &str = "CuraCore";

/// Default number of triage workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default Event Queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Data directory (vault, telemetry) from `CURA_DATA_DIR` or the platform default
pub fn get_data_dir() -> PathBuf {
    std::env::var("CURA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir())
}

/// Platform default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// Worker count override
pub fn get_workers() -> Option<usize> {
    std::env::var("CURA_WORKERS")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Queue capacity override
pub fn get_queue_capacity() -> Option<usize> {
    std::env::var("CURA_QUEUE_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// ONNX model path override (enables the ONNX high-power backend)
pub fn get_model_path() -> Option<PathBuf> {
    std::env::var("CURA_MODEL_PATH")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Initial gear policy override: "auto", "eco"/"low", "turbo"/"high"
pub fn get_gear_policy() -> Option<String> {
    std::env::var("CURA_GEAR")
        .ok()
        .map(|s| s.to_lowercase())
}
