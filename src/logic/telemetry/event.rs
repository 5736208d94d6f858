//! Security Event Types
//!
//! Immutable, timestamped records of what the triage pipeline decided and
//! why. One JSON object per line on disk.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::arbiter::ProcessState;
use crate::logic::model::SwitchReport;
use crate::logic::sensor::EventId;
use crate::logic::threat::{Verdict, VerdictAction};
use crate::logic::vault::VaultEntry;

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A verdict was delivered to the enforcement point
    VerdictIssued,
    /// Sensor event rejected because the queue was full
    QueueOverflow,
    /// Feature extraction failed; event scored as worst case
    ExtractionFallback,
    /// Inference result discarded as stale and re-submitted
    StaleResubmit,
    /// Process profile moved to a new state
    StateTransition,
    /// Active inference backend changed
    BackendSwitch,
    VaultCapture,
    VaultRestore,
    VaultPurge,
    /// A vault operation failed
    VaultFailure,
    /// Triage broke down and failed toward Block
    IntegrityViolation,
    SystemStart,
    SystemStop,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::VerdictIssued => "verdict_issued",
            EventType::QueueOverflow => "queue_overflow",
            EventType::ExtractionFallback => "extraction_fallback",
            EventType::StaleResubmit => "stale_resubmit",
            EventType::StateTransition => "state_transition",
            EventType::BackendSwitch => "backend_switch",
            EventType::VaultCapture => "vault_capture",
            EventType::VaultRestore => "vault_restore",
            EventType::VaultPurge => "vault_purge",
            EventType::VaultFailure => "vault_failure",
            EventType::IntegrityViolation => "integrity_violation",
            EventType::SystemStart => "system_start",
            EventType::SystemStop => "system_stop",
        }
    }

    /// 0 (informational) .. 6 (needs attention now)
    pub fn severity(&self) -> u8 {
        match self {
            EventType::SystemStart | EventType::SystemStop => 0,
            EventType::BackendSwitch | EventType::StaleResubmit => 1,
            EventType::VerdictIssued | EventType::VaultRestore | EventType::VaultPurge => 2,
            EventType::ExtractionFallback | EventType::VaultCapture => 3,
            EventType::StateTransition | EventType::QueueOverflow => 4,
            EventType::VaultFailure => 5,
            EventType::IntegrityViolation => 6,
        }
    }
}

// ============================================================================
// SECURITY EVENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub session_id: String,
    pub hostname: Option<String>,
    pub severity: u8,
    pub pid: Option<u32>,
    pub event_id: Option<EventId>,
    pub metadata: Option<serde_json::Value>,
    pub description: String,
}

impl SecurityEvent {
    pub fn new(event_type: EventType, description: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            session_id: get_session_id(),
            hostname: HOSTNAME.clone(),
            severity: event_type.severity(),
            pid: None,
            event_id: None,
            metadata: None,
            description: description.to_string(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_actionable(&self) -> bool {
        self.severity >= 4
    }
}

// ============================================================================
// SESSION / HOST
// ============================================================================

static SESSION_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().to_string());

static HOSTNAME: Lazy<Option<String>> =
    Lazy::new(|| hostname::get().ok().map(|h| h.to_string_lossy().to_string()));

/// Generated once per process run
pub fn get_session_id() -> String {
    SESSION_ID.clone()
}

// ============================================================================
// CONVENIENCE CONSTRUCTORS
// ============================================================================

impl SecurityEvent {
    pub fn verdict_issued(verdict: &Verdict) -> Self {
        let event = Self::new(
            EventType::VerdictIssued,
            &format!(
                "{} for pid {} on {} ({})",
                verdict.action, verdict.pid, verdict.event_id, verdict.level
            ),
        )
        .with_pid(verdict.pid)
        .with_event(verdict.event_id)
        .with_metadata(serde_json::json!({
            "action": verdict.action,
            "level": verdict.level,
            "score": verdict.score,
            "origin": verdict.origin,
        }));

        // Blocks deserve attention even though verdicts are routine
        if verdict.action == VerdictAction::Block {
            event.with_severity(4)
        } else {
            event
        }
    }

    pub fn queue_overflow(pid: u32, event_id: EventId, capacity: usize) -> Self {
        Self::new(
            EventType::QueueOverflow,
            &format!("Queue full ({}), rejected {} from pid {}", capacity, event_id, pid),
        )
        .with_pid(pid)
        .with_event(event_id)
        .with_metadata(serde_json::json!({ "capacity": capacity }))
    }

    pub fn extraction_fallback(pid: u32, event_id: EventId, error: &str) -> Self {
        Self::new(
            EventType::ExtractionFallback,
            &format!("Extraction failed for {}: {}", event_id, error),
        )
        .with_pid(pid)
        .with_event(event_id)
        .with_metadata(serde_json::json!({ "error": error }))
    }

    pub fn stale_resubmit(pid: u32, event_id: EventId, attempt: u32, issued: u64, current: u64) -> Self {
        Self::new(
            EventType::StaleResubmit,
            &format!(
                "Stale result for {} (generation {} < {}), attempt {}",
                event_id, issued, current, attempt
            ),
        )
        .with_pid(pid)
        .with_event(event_id)
        .with_metadata(serde_json::json!({
            "attempt": attempt,
            "issued_generation": issued,
            "current_generation": current,
        }))
    }

    pub fn state_transition(pid: u32, from: ProcessState, to: ProcessState, reason: &str) -> Self {
        Self::new(
            EventType::StateTransition,
            &format!("pid {}: {} -> {} ({})", pid, from, to, reason),
        )
        .with_pid(pid)
        .with_metadata(serde_json::json!({
            "from": from,
            "to": to,
            "reason": reason,
        }))
    }

    pub fn backend_switch(report: &SwitchReport) -> Self {
        Self::new(
            EventType::BackendSwitch,
            &format!(
                "Backend {} -> {} (generation {})",
                report.from, report.to, report.generation
            ),
        )
        .with_metadata(serde_json::to_value(report).unwrap_or_default())
    }

    pub fn vault_capture(entry: &VaultEntry) -> Self {
        Self::vault_event(EventType::VaultCapture, "Captured", entry)
    }

    pub fn vault_restore(entry: &VaultEntry) -> Self {
        Self::vault_event(EventType::VaultRestore, "Restored", entry)
    }

    pub fn vault_purge(entry: &VaultEntry) -> Self {
        Self::vault_event(EventType::VaultPurge, "Purged", entry)
    }

    fn vault_event(event_type: EventType, verb: &str, entry: &VaultEntry) -> Self {
        Self::new(
            event_type,
            &format!("{} {} ({})", verb, entry.original_path.display(), entry.id),
        )
        .with_pid(entry.pid)
        .with_metadata(serde_json::json!({
            "entry_id": entry.id,
            "original_path": entry.original_path,
            "sha256": entry.sha256,
            "size": entry.size,
            "reason": entry.reason,
        }))
    }

    pub fn vault_failure(operation: &str, target: &str, error: &str) -> Self {
        Self::new(
            EventType::VaultFailure,
            &format!("Vault {} failed for {}: {}", operation, target, error),
        )
        .with_metadata(serde_json::json!({
            "operation": operation,
            "target": target,
            "error": error,
        }))
    }

    pub fn integrity_violation(pid: u32, event_id: EventId, detail: &str) -> Self {
        Self::new(
            EventType::IntegrityViolation,
            &format!("Triage failed for {} (pid {}): {}", event_id, pid, detail),
        )
        .with_pid(pid)
        .with_event(event_id)
    }

    pub fn system_start(version: &str) -> Self {
        Self::new(EventType::SystemStart, &format!("CURA Core started (v{})", version))
            .with_metadata(serde_json::json!({
                "version": version,
                "platform": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
            }))
    }

    pub fn system_stop(uptime_secs: u64) -> Self {
        Self::new(
            EventType::SystemStop,
            &format!("CURA Core stopped (uptime: {}s)", uptime_secs),
        )
        .with_metadata(serde_json::json!({ "uptime_secs": uptime_secs }))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::threat::{ThreatLevel, VerdictOrigin};

    #[test]
    fn test_event_creation() {
        let event = SecurityEvent::new(EventType::QueueOverflow, "full");
        assert!(!event.id.is_empty());
        assert_eq!(event.severity, 4);
        assert_eq!(event.session_id, get_session_id());
    }

    #[test]
    fn test_block_verdict_raises_severity() {
        let mut verdict = Verdict {
            event_id: EventId(3),
            pid: 77,
            action: VerdictAction::Monitor,
            level: ThreatLevel::Suspicious,
            score: Some(0.3),
            origin: VerdictOrigin::Scored,
        };
        assert_eq!(SecurityEvent::verdict_issued(&verdict).severity, 2);

        verdict.action = VerdictAction::Block;
        let event = SecurityEvent::verdict_issued(&verdict);
        assert_eq!(event.severity, 4);
        assert_eq!(event.pid, Some(77));
        assert_eq!(event.event_id, Some(EventId(3)));
    }

    #[test]
    fn test_to_jsonl_single_line() {
        let event = SecurityEvent::state_transition(
            5,
            ProcessState::Observing,
            ProcessState::Escalated,
            "risky event",
        );
        let line = event.to_jsonl();
        assert!(!line.contains('\n'));
        assert!(line.contains("StateTransition"));
        assert!(line.contains("Escalated"));
    }
}
