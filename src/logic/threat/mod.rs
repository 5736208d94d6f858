//! Threat Module
//!
//! Maps an inference probability to a discrete level and the level to an
//! enforcement action.
//!
//! ## Structure
//! - `types`: `ThreatLevel`, `ThreatScore`, `Verdict`
//! - `rules`: fixed interval boundaries
//! - `classifier`: score → level
//!
//! ## Usage
//! ```ignore
//! use crate::logic::threat::{classify, ThreatLevel};
//!
//! match classify(score.probability) {
//!     ThreatLevel::Clean => {}
//!     level => log::info!("{} -> {}", level, level.verdict()),
//! }
//! ```

pub mod types;
pub mod rules;
pub mod classifier;

pub use types::{ThreatLevel, ThreatScore, Verdict, VerdictAction, VerdictOrigin};
pub use rules::{MALICIOUS_MIN, RISKY_MIN, SUSPICIOUS_MIN};
pub use classifier::classify;
