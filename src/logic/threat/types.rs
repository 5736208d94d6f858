//! Threat Types
//!
//! Core types for threat classification and verdicts.
//! No logic beyond small mappings.

use serde::{Deserialize, Serialize};

use crate::logic::model::BackendKind;
use crate::logic::sensor::EventId;

// ============================================================================
// THREAT LEVEL
// ============================================================================

/// Ordered threat levels: Clean < Suspicious < Risky < Malicious
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreatLevel {
    /// 0-20%: safe
    Clean,
    /// 20-50%: monitor
    Suspicious,
    /// 50-70%: send to vault
    Risky,
    /// 70-100%: block immediately
    Malicious,
}

impl ThreatLevel {
    pub const ALL: [ThreatLevel; 4] = [
        ThreatLevel::Clean,
        ThreatLevel::Suspicious,
        ThreatLevel::Risky,
        ThreatLevel::Malicious,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Clean => "clean",
            ThreatLevel::Suspicious => "suspicious",
            ThreatLevel::Risky => "risky",
            ThreatLevel::Malicious => "malicious",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Enforcement action for this level
    pub fn verdict(&self) -> VerdictAction {
        match self {
            ThreatLevel::Clean => VerdictAction::Allow,
            ThreatLevel::Suspicious => VerdictAction::Monitor,
            ThreatLevel::Risky => VerdictAction::Vault,
            ThreatLevel::Malicious => VerdictAction::Block,
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// THREAT SCORE (from inference)
// ============================================================================

/// Probability of malice for one event, tagged with the backend generation
/// the request was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreatScore {
    pub event_id: EventId,
    /// 0.0 - 1.0
    pub probability: f32,
    pub generation: u64,
    pub backend: BackendKind,
}

// ============================================================================
// VERDICT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VerdictAction {
    /// Permit the operation
    Allow,
    /// Permit and log
    Monitor,
    /// Permit with an immediate quarantine copy
    Vault,
    /// Deny and quarantine
    Block,
}

impl VerdictAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictAction::Allow => "allow",
            VerdictAction::Monitor => "monitor",
            VerdictAction::Vault => "vault",
            VerdictAction::Block => "block",
        }
    }
}

impl std::fmt::Display for VerdictAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a verdict came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictOrigin {
    /// Normal scoring path
    Scored,
    /// Extraction failed; scored as worst case
    ExtractionFallback,
    /// Re-submission budget exhausted after repeated stale results
    StaleExhausted,
    /// Triage failed or timed out; failed toward Block
    IntegrityFailSafe,
}

/// Exactly one per event, delivered to the enforcement point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub event_id: EventId,
    pub pid: u32,
    pub action: VerdictAction,
    pub level: ThreatLevel,
    pub score: Option<f32>,
    pub origin: VerdictOrigin,
}

impl Verdict {
    /// Block issued without a score (integrity failure)
    pub fn fail_safe(event_id: EventId, pid: u32) -> Self {
        Self {
            event_id,
            pid,
            action: VerdictAction::Block,
            level: ThreatLevel::Malicious,
            score: None,
            origin: VerdictOrigin::IntegrityFailSafe,
        }
    }
}
