//! Classification Boundaries
//!
//! Intervals are closed-open except the last: a score exactly on a boundary
//! belongs to the higher level.

/// [0.00, 0.20) Clean
pub const SUSPICIOUS_MIN: f32 = 0.20;

/// [0.20, 0.50) Suspicious
pub const RISKY_MIN: f32 = 0.50;

/// [0.50, 0.70) Risky, [0.70, 1.00] Malicious
pub const MALICIOUS_MIN: f32 = 0.70;
