//! Feature Extractor
//!
//! `KernelEvent -> FeatureRecord`. Deterministic for a given filesystem
//! state; the only I/O is read-only metadata lookups.

use std::fs;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::layout::*;
use super::path;
use crate::logic::sensor::{EventId, EventKind, KernelEvent};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Regexes over the normalized path (lowercase, `/` separators)
    pub sensitive_dirs: Vec<String>,
    /// Case-insensitive substrings an operator wants guarded
    pub protected_patterns: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            sensitive_dirs: vec![
                r"^[a-z]:/windows/system32/".to_string(),
                r"^[a-z]:/users/[^/]+/(documents|desktop|pictures)/".to_string(),
                r"/start menu/programs/startup/".to_string(),
                r"^/etc/".to_string(),
                r"/\.ssh/".to_string(),
            ],
            protected_patterns: vec!["rahasia".to_string()],
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("metadata unavailable for {path}: {kind:?}")]
    MetadataUnavailable { path: String, kind: std::io::ErrorKind },

    #[error("{kind} event carries no path")]
    EmptyPath { kind: EventKind },

    #[error("invalid sensitive-dir pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

// ============================================================================
// FEATURE RECORD
// ============================================================================

/// Scoring-ready features for one event. Discarded after scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub event_id: EventId,
    pub pid: u32,
    pub kind: EventKind,
    pub values: [f32; FEATURE_COUNT],
    /// Built without metadata; scored as worst case
    pub degraded: bool,
}

impl FeatureRecord {
    /// Maximally suspicious input, used when extraction fails
    pub fn worst_case(event: &KernelEvent) -> Self {
        Self {
            event_id: event.id(),
            pid: event.pid(),
            kind: event.kind(),
            values: [1.0; FEATURE_COUNT],
            degraded: true,
        }
    }

    pub fn get(&self, index: usize) -> f32 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct FeatureExtractor {
    sensitive_dirs: Vec<Regex>,
    protected_patterns: Vec<String>,
}

impl FeatureExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractionError> {
        let sensitive_dirs = config
            .sensitive_dirs
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ExtractionError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            sensitive_dirs,
            protected_patterns: config
                .protected_patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_lowercase())
                .collect(),
        })
    }

    pub fn extract(&self, event: &KernelEvent) -> Result<FeatureRecord, ExtractionError> {
        let kind = event.kind();
        let raw_path = event.path();

        if kind.touches_artifact() && raw_path.is_empty() {
            return Err(ExtractionError::EmptyPath { kind });
        }

        let size = self.file_size(kind, raw_path)?;

        let normalized = path::normalize(raw_path);
        let name = path::file_name(&normalized);
        let mut values = [0.0f32; FEATURE_COUNT];

        values[IDX_EVENT_WEIGHT] = event_weight(kind);
        values[IDX_CONTEXT_ENTROPY] = path::shannon_entropy(event.context()) / 8.0;

        if kind == EventKind::NetworkConnect {
            values[IDX_NETWORK] = 1.0;
        } else if kind.touches_artifact() {
            values[IDX_EXTENSION_RISK] = path::extension_risk(name);
            values[IDX_NAME_ENTROPY] = path::name_entropy(name);
            values[IDX_SENSITIVE_DIR] = flag(self.is_sensitive(&normalized));
            values[IDX_PROTECTED_TARGET] = flag(self.is_protected(&normalized));
            values[IDX_SUSPICIOUS_IMAGE] = flag(path::is_suspicious_name(&normalized));
            values[IDX_TEMP_OR_HIDDEN] = flag(path::is_temp_or_hidden(&normalized));
            values[IDX_PATH_DEPTH] = (path::depth(&normalized) as f32 / 32.0).min(1.0);
            values[IDX_FILE_SIZE] = size
                .map(|s| ((s as f64 + 1.0).log10() / 10.0).min(1.0) as f32)
                .unwrap_or(0.0);
        }

        Ok(FeatureRecord {
            event_id: event.id(),
            pid: event.pid(),
            kind,
            values,
            degraded: false,
        })
    }

    /// Writes and deletes need the file to exist; creates and process
    /// images use metadata when present.
    fn file_size(&self, kind: EventKind, raw_path: &str) -> Result<Option<u64>, ExtractionError> {
        if !kind.touches_artifact() {
            return Ok(None);
        }

        match fs::metadata(raw_path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if matches!(kind, EventKind::FileWrite | EventKind::FileDelete) => {
                Err(ExtractionError::MetadataUnavailable {
                    path: raw_path.to_string(),
                    kind: e.kind(),
                })
            }
            Err(_) => Ok(None),
        }
    }

    pub fn is_sensitive(&self, normalized: &str) -> bool {
        self.sensitive_dirs.iter().any(|re| re.is_match(normalized))
    }

    pub fn is_protected(&self, normalized: &str) -> bool {
        self.protected_patterns.iter().any(|p| normalized.contains(p.as_str()))
    }
}

fn event_weight(kind: EventKind) -> f32 {
    match kind {
        EventKind::FileCreate => 0.2,
        EventKind::FileWrite => 0.3,
        EventKind::FileDelete => 0.5,
        EventKind::ProcessCreate => 0.4,
        EventKind::ProcessTerminate => 0.0,
        EventKind::NetworkConnect => 0.3,
    }
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}
