//! Operator Commands
//!
//! Read-mostly views plus the three mutating operator actions: restore,
//! purge and resolve.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants;
use crate::logic::arbiter::{ArbiterError, ArbiterPolicy, ProfileSummary, Transition};
use crate::logic::model::{BackendState, EngineStats, GearPolicy};
use crate::logic::pipeline::{PipelineStats, TriageService};
use crate::logic::queue::QueueStats;
use crate::logic::telemetry::{list_log_files, read_events, RecorderStats, SecurityEvent};
use crate::logic::vault::{RestoreMode, VaultEntry, VaultStats};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub version: String,
    pub workers: usize,
    pub gear_policy: GearPolicy,
    pub queue: QueueStats,
    pub engine: EngineStats,
    pub pipeline: PipelineStats,
    pub vault: VaultStats,
    pub telemetry: RecorderStats,
    pub tracked_processes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub entry: VaultEntry,
    /// Set when the capturing process was moved to `Resolved`
    pub resolved: Option<Transition>,
}

fn parse_id(id: &str) -> Result<Uuid, String> {
    Uuid::parse_str(id).map_err(|e| format!("invalid vault id '{}': {}", id, e))
}

// ============================================================================
// STATUS
// ============================================================================

pub fn get_status(service: &TriageService) -> Result<ServiceStatus, String> {
    Ok(ServiceStatus {
        version: constants::APP_VERSION.to_string(),
        workers: service.config().service.workers,
        gear_policy: service.scheduler().policy(),
        queue: service.queue().stats(),
        engine: service.engine().stats(),
        pipeline: service.stats(),
        vault: service.vault().stats(),
        telemetry: service.telemetry().stats(),
        tracked_processes: service.arbiter().len(),
    })
}

pub fn get_queue_stats(service: &TriageService) -> Result<QueueStats, String> {
    Ok(service.queue().stats())
}

// ============================================================================
// PROCESSES
// ============================================================================

pub fn get_processes(service: &TriageService) -> Result<Vec<ProfileSummary>, String> {
    Ok(service.arbiter().profiles())
}

pub fn get_process(service: &TriageService, pid: u32) -> Result<Option<ProfileSummary>, String> {
    Ok(service.arbiter().profile(pid))
}

/// Operator closes the incident for `pid`
pub fn resolve_process(service: &TriageService, pid: u32, reason: String) -> Result<Transition, String> {
    let transition = service
        .arbiter()
        .resolve(pid, &reason)
        .map_err(|e| e.to_string())?;
    service.pipeline().record_transitions(std::slice::from_ref(&transition));
    log::info!("pid {} resolved by operator: {}", pid, reason);
    Ok(transition)
}

// ============================================================================
// VAULT
// ============================================================================

pub fn get_vault_entries(service: &TriageService, pid: Option<u32>) -> Result<Vec<VaultEntry>, String> {
    Ok(match pid {
        Some(pid) => service.vault().entries_for_pid(pid),
        None => service.vault().list(),
    })
}

pub fn get_vault_entry(service: &TriageService, id: String) -> Result<Option<VaultEntry>, String> {
    Ok(service.vault().get(&parse_id(&id)?))
}

pub fn get_vault_stats(service: &TriageService) -> Result<VaultStats, String> {
    Ok(service.vault().stats())
}

/// Restore a captured artifact. Live processes that touched the path
/// block the restore; on success the capturing process is resolved.
pub fn restore_artifact(service: &TriageService, id: String, force: bool) -> Result<RestoreOutcome, String> {
    let id = parse_id(&id)?;
    let mode = if force { RestoreMode::Overwrite } else { RestoreMode::Strict };

    let entry = match service.vault().restore(&id, &**service.arbiter(), mode) {
        Ok(entry) => entry,
        Err(e) => {
            service.telemetry().record(SecurityEvent::vault_failure(
                "restore",
                &id.to_string(),
                &e.to_string(),
            ));
            return Err(e.to_string());
        }
    };
    service.telemetry().record(SecurityEvent::vault_restore(&entry));

    let resolved = match service.arbiter().resolve(entry.pid, "artifact restored by operator") {
        Ok(t) => {
            service.pipeline().record_transitions(std::slice::from_ref(&t));
            Some(t)
        }
        // Already resolved or evicted
        Err(ArbiterError::UnknownProcess(_)) | Err(ArbiterError::InvalidTransition { .. }) => None,
        Err(e) => return Err(e.to_string()),
    };

    Ok(RestoreOutcome { entry, resolved })
}

pub fn purge_artifact(service: &TriageService, id: String) -> Result<VaultEntry, String> {
    let id = parse_id(&id)?;
    match service.vault().purge(&id) {
        Ok(entry) => {
            service.telemetry().record(SecurityEvent::vault_purge(&entry));
            Ok(entry)
        }
        Err(e) => {
            service.telemetry().record(SecurityEvent::vault_failure(
                "purge",
                &id.to_string(),
                &e.to_string(),
            ));
            Err(e.to_string())
        }
    }
}

// ============================================================================
// POLICY & INFERENCE
// ============================================================================

pub fn get_policy(service: &TriageService) -> Result<ArbiterPolicy, String> {
    Ok(service.arbiter().policy())
}

pub fn update_policy(service: &TriageService, policy: ArbiterPolicy) -> Result<ArbiterPolicy, String> {
    service
        .arbiter()
        .update_policy(policy)
        .map_err(|e| e.to_string())?;
    log::info!("Arbiter policy updated");
    Ok(service.arbiter().policy())
}

pub fn get_backend_state(service: &TriageService) -> Result<BackendState, String> {
    Ok(service.engine().backend_state())
}

pub fn get_engine_stats(service: &TriageService) -> Result<EngineStats, String> {
    Ok(service.engine().stats())
}

pub fn set_gear_policy(service: &TriageService, policy: String) -> Result<GearPolicy, String> {
    let policy: GearPolicy = policy.parse()?;
    service.scheduler().set_policy(policy);
    log::info!("Gear policy set to {}", policy.as_str());
    Ok(policy)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Most recent security events, newest first
pub fn get_security_events(
    service: &TriageService,
    limit: Option<usize>,
    actionable_only: bool,
) -> Result<Vec<SecurityEvent>, String> {
    let limit = limit.unwrap_or(100);
    let dir = match service.telemetry().current_log_file() {
        Some(file) => match file.parent() {
            Some(dir) => dir.to_path_buf(),
            None => return Ok(Vec::new()),
        },
        None => return Ok(Vec::new()),
    };

    let mut events = Vec::new();
    for file in list_log_files(&dir).map_err(|e| e.to_string())?.iter().rev() {
        let mut batch = read_events(file).map_err(|e| e.to_string())?;
        batch.reverse();
        events.extend(batch.into_iter().filter(|e| !actionable_only || e.is_actionable()));
        if events.len() >= limit {
            break;
        }
    }
    events.truncate(limit);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::logic::arbiter::ProcessState;
    use crate::logic::config::AgentConfig;
    use crate::logic::pipeline::CollectingSink;
    use crate::logic::sensor::{EventKind, KernelEvent};

    fn service(dir: &std::path::Path) -> TriageService {
        let mut config = AgentConfig::default();
        config.data_dir = dir.join("data");
        config.service.workers = 1;
        TriageService::new(config, Arc::new(CollectingSink::new())).unwrap()
    }

    #[test]
    fn test_restore_resolves_capturing_process() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("invoice.docx");
        std::fs::write(&target, b"original").unwrap();

        let svc = service(dir.path());
        svc.arbiter().force_contain(77, "test");
        let entry = svc.vault().capture(&target, 77, crate::logic::vault::CaptureReason::Containment).unwrap();
        std::fs::write(&target, b"encrypted").unwrap();

        assert!(restore_artifact(&svc, entry.id.to_string(), false).is_err());
        let outcome = restore_artifact(&svc, entry.id.to_string(), true).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert_eq!(outcome.resolved.map(|t| t.to), Some(ProcessState::Resolved));
        assert_eq!(svc.arbiter().state_of(77), Some(ProcessState::Resolved));

        // Second resolve is rejected
        assert!(resolve_process(&svc, 77, "again".to_string()).is_err());
        assert!(purge_artifact(&svc, entry.id.to_string()).is_ok());
        assert!(purge_artifact(&svc, entry.id.to_string()).is_err());

        let events = get_security_events(&svc, Some(10), false).unwrap();
        assert!(events.len() >= 3);
        assert_eq!(events[0].event_type, crate::logic::telemetry::EventType::VaultFailure);
    }

    #[test]
    fn test_restore_refused_while_path_in_use() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("shared.txt");
        std::fs::write(&target, b"v1").unwrap();

        let svc = service(dir.path());
        let entry = svc.vault().capture(&target, 5, crate::logic::vault::CaptureReason::Operator).unwrap();

        // Another live process touches the same file
        let other = KernelEvent::new(1, 1, 6, 1, EventKind::FileWrite, target.to_string_lossy(), vec![]).unwrap();
        svc.pipeline().triage(&other);

        let err = restore_artifact(&svc, entry.id.to_string(), true).unwrap_err();
        assert!(err.contains("in use"), "{}", err);
    }

    #[test]
    fn test_gear_policy_and_bad_ids() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path());

        assert_eq!(set_gear_policy(&svc, "turbo".to_string()).unwrap(), GearPolicy::ForceHighPower);
        assert!(set_gear_policy(&svc, "warp".to_string()).is_err());
        assert!(get_vault_entry(&svc, "not-a-uuid".to_string()).is_err());

        let status = get_status(&svc).unwrap();
        assert_eq!(status.gear_policy, GearPolicy::ForceHighPower);
        assert_eq!(status.tracked_processes, 0);

        svc.shutdown(Duration::from_millis(10));
    }
}
