//! Threat Classifier
//!
//! Pure, total mapping from a probability to a `ThreatLevel`.
//! Out-of-range input is clamped; NaN fails toward `Malicious`.

use super::rules::{MALICIOUS_MIN, RISKY_MIN, SUSPICIOUS_MIN};
use super::types::ThreatLevel;

pub fn classify(score: f32) -> ThreatLevel {
    if score.is_nan() || score >= MALICIOUS_MIN {
        ThreatLevel::Malicious
    } else if score >= RISKY_MIN {
        ThreatLevel::Risky
    } else if score >= SUSPICIOUS_MIN {
        ThreatLevel::Suspicious
    } else {
        ThreatLevel::Clean
    }
}

// ============================================================================
// TESTS
// ============================================================================
