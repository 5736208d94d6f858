//! Scoring Backends
//!
//! A backend maps one `FeatureRecord` to a probability of malice.
//! Two hardware profiles exist (low-power and high-power); both are
//! interchangeable behind `ScoringBackend`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::features::layout::*;
use crate::logic::features::{FeatureRecord, LayoutMismatchError};

// ============================================================================
// BACKEND KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Cheap heuristic scorer ("eco")
    #[serde(alias = "eco")]
    LowPower,
    /// Model-backed scorer ("turbo")
    #[serde(alias = "turbo")]
    HighPower,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LowPower => "eco",
            BackendKind::HighPower => "turbo",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            BackendKind::LowPower => 0,
            BackendKind::HighPower => 1,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("failed to load model: {0}")]
    Load(String),

    #[error("inference failed: {0}")]
    Run(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Layout(#[from] LayoutMismatchError),
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

pub trait ScoringBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Probability of malice in [0, 1]
    fn score(&self, record: &FeatureRecord) -> Result<f32, InferenceError>;

    /// Called before the backend starts taking requests after a switch
    fn activate(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    /// Called once the backend has been drained after a switch away
    fn release(&self) {}
}

// ============================================================================
// HEURISTIC BACKEND
// ============================================================================

/// Weighted logistic scorer over the feature layout.
///
/// The low-power profile is a plain linear combination. The high-power
/// profile adds interaction terms that catch encrypted rewrites of
/// sensitive files, which the linear form under-weights.
#[derive(Debug, Clone)]
pub struct HeuristicBackend {
    name: &'static str,
    weights: [f32; FEATURE_COUNT],
    bias: f32,
    interactions: bool,
}

const HEURISTIC_WEIGHTS: [f32; FEATURE_COUNT] = [
    2.0, // event_weight
    2.5, // extension_risk
    0.8, // name_entropy
    1.0, // sensitive_dir
    4.0, // protected_target
    5.0, // suspicious_image
    1.5, // context_entropy
    0.3, // file_size
    0.8, // temp_or_hidden
    0.2, // path_depth
    0.5, // network
    3.0, // metadata_missing
];

const HEURISTIC_BIAS: f32 = -5.0;

impl HeuristicBackend {
    pub fn low_power() -> Self {
        Self {
            name: "heuristic-eco",
            weights: HEURISTIC_WEIGHTS,
            bias: HEURISTIC_BIAS,
            interactions: false,
        }
    }

    pub fn high_power() -> Self {
        Self {
            name: "heuristic-turbo",
            weights: HEURISTIC_WEIGHTS,
            bias: HEURISTIC_BIAS,
            interactions: true,
        }
    }

    fn logit(&self, v: &[f32]) -> f32 {
        let mut z = self.bias;
        for (w, x) in self.weights.iter().zip(v) {
            z += w * x;
        }

        if self.interactions {
            z += 1.5 * v[IDX_EXTENSION_RISK] * v[IDX_CONTEXT_ENTROPY];
            z += 1.0 * v[IDX_SENSITIVE_DIR] * v[IDX_CONTEXT_ENTROPY];
            z += 1.0 * v[IDX_SUSPICIOUS_IMAGE] * v[IDX_TEMP_OR_HIDDEN];
        }
        z
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl ScoringBackend for HeuristicBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn score(&self, record: &FeatureRecord) -> Result<f32, InferenceError> {
        let p = sigmoid(self.logit(record.as_slice()));
        if p.is_nan() {
            return Err(InferenceError::InvalidOutput("NaN score".to_string()));
        }
        Ok(p.clamp(0.0, 1.0))
    }
}

// ============================================================================
// TESTS
// ============================================================================
