//! Decision Arbiter
//!
//! Per-process state machine turning (event, level, history, policy) into a
//! verdict plus the vault captures that go with it.
//!
//! The profile table is a map of individually locked profiles. The map lock
//! is held only to look up or insert; a profile lock is held only while
//! deciding. Captures are returned to the caller and performed after every
//! lock is released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::policy::ArbiterPolicy;
use super::profile::{ProcessProfile, ProcessState, ProfileSummary, Transition};
use super::ArbiterError;
use crate::logic::sensor::{EventKind, KernelEvent};
use crate::logic::threat::{ThreatLevel, Verdict, VerdictAction, VerdictOrigin};
use crate::logic::vault::{CaptureReason, PathOwnership};

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub path: PathBuf,
    pub pid: u32,
    pub reason: CaptureReason,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub captures: Vec<CaptureRequest>,
    pub transitions: Vec<Transition>,
}

impl Decision {
    /// The process was contained by this decision
    pub fn contained(&self) -> bool {
        self.transitions.iter().any(|t| t.to == ProcessState::Contained)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub transitions: Vec<Transition>,
    pub captures: Vec<CaptureRequest>,
    pub evicted: Vec<u32>,
}

type ProfileRef = Arc<Mutex<ProcessProfile>>;

// ============================================================================
// ARBITER
// ============================================================================

pub struct DecisionArbiter {
    profiles: RwLock<HashMap<u32, ProfileRef>>,
    policy: RwLock<ArbiterPolicy>,
}

impl DecisionArbiter {
    pub fn new(policy: ArbiterPolicy) -> Result<Self, ArbiterError> {
        policy.validate()?;
        Ok(Self {
            profiles: RwLock::new(HashMap::new()),
            policy: RwLock::new(policy),
        })
    }

    pub fn policy(&self) -> ArbiterPolicy {
        self.policy.read().clone()
    }

    pub fn update_policy(&self, policy: ArbiterPolicy) -> Result<(), ArbiterError> {
        policy.validate()?;
        *self.policy.write() = policy;
        log::info!("Arbiter policy updated");
        Ok(())
    }

    pub fn decide(
        &self,
        event: &KernelEvent,
        score: Option<f32>,
        level: ThreatLevel,
        origin: VerdictOrigin,
    ) -> Decision {
        self.decide_at(event, score, level, origin, Instant::now())
    }

    pub fn decide_at(
        &self,
        event: &KernelEvent,
        score: Option<f32>,
        level: ThreatLevel,
        origin: VerdictOrigin,
        now: Instant,
    ) -> Decision {
        let policy = self.policy();
        let profile = self.profile_for(event, now);
        let mut p = profile.lock();

        p.last_seen = now;
        p.counts[level.index()] += 1;
        if event.kind() == EventKind::ProcessCreate && p.image.is_none() && !event.path().is_empty() {
            p.image = Some(event.path().to_string());
        }
        if event.kind() == EventKind::ProcessTerminate {
            p.terminated_at.get_or_insert(now);
        }

        let artifact = artifact_path(event);
        if let Some(path) = &artifact {
            p.record_touch(path, now, policy.max_touched_paths);
        }

        let mut transitions = Vec::new();

        if p.state != ProcessState::Resolved {
            if level >= ThreatLevel::Suspicious {
                p.record_risk(score.unwrap_or(1.0), now);
            }
            p.highest = p.highest.max(level);

            let cumulative = p.cumulative_risk(now, policy.risk_window());
            let next = if level == ThreatLevel::Malicious {
                Some((ProcessState::Contained, "malicious event".to_string()))
            } else if p.state == ProcessState::Escalated && dwell_exceeded(&mut p, now, &policy) {
                Some((ProcessState::Contained, "escalation dwell exceeded".to_string()))
            } else if p.state == ProcessState::Observing && level == ThreatLevel::Risky {
                Some((ProcessState::Escalated, "risky event".to_string()))
            } else if p.state == ProcessState::Observing && cumulative >= policy.cumulative_risk_threshold {
                Some((ProcessState::Escalated, format!("cumulative risk {:.2}", cumulative)))
            } else {
                None
            };

            if let Some((to, reason)) = next {
                transitions.extend(p.advance(to, now, &reason));
            }
        }

        let action = match p.state {
            ProcessState::Contained => VerdictAction::Block,
            // Terminal: judged on this event alone
            ProcessState::Resolved => level.verdict(),
            // Never milder than the worst seen so far
            _ => p.highest.verdict(),
        };

        let mut captures = Vec::new();
        let pid = event.pid();

        if let Some(path) = &artifact {
            let reason = match action {
                VerdictAction::Block => Some(CaptureReason::Containment),
                VerdictAction::Vault => Some(CaptureReason::RiskyArtifact),
                _ if p.state == ProcessState::Escalated
                    && policy.snapshot_escalated_writes
                    && matches!(event.kind(), EventKind::FileWrite | EventKind::FileDelete) =>
                {
                    Some(CaptureReason::Snapshot)
                }
                _ => None,
            };
            if let Some(reason) = reason {
                captures.push(CaptureRequest {
                    path: PathBuf::from(path),
                    pid,
                    reason,
                });
            }
        }

        if transitions.iter().any(|t| t.to == ProcessState::Contained) {
            captures.extend(lookback_captures(&p, now, &policy, artifact.as_deref()));
        }

        drop(p);

        for t in &transitions {
            log::warn!("pid {}: {} -> {} ({})", t.pid, t.from, t.to, t.reason);
        }

        Decision {
            verdict: Verdict {
                event_id: event.id(),
                pid,
                action,
                level,
                score,
                origin,
            },
            captures,
            transitions,
        }
    }

    /// Profile for the event's pid. A ProcessCreate starts a new incarnation
    /// (pid reuse) when the profile is terminated or resolved, or when its
    /// image differs from the recorded one; the latter covers a lost
    /// ProcessTerminate.
    fn profile_for(&self, event: &KernelEvent, now: Instant) -> ProfileRef {
        let pid = event.pid();
        let reuse = |p: &ProfileRef| {
            if event.kind() != EventKind::ProcessCreate {
                return false;
            }
            let p = p.lock();
            let other_image = match &p.image {
                Some(image) if !event.path().is_empty() => {
                    crate::logic::features::path::normalize(image)
                        != crate::logic::features::path::normalize(event.path())
                }
                _ => false,
            };
            p.terminated_at.is_some() || p.state == ProcessState::Resolved || other_image
        };

        if let Some(existing) = self.profiles.read().get(&pid) {
            if !reuse(existing) {
                return Arc::clone(existing);
            }
        }

        let mut profiles = self.profiles.write();
        if let Some(existing) = profiles.get(&pid) {
            if !reuse(existing) {
                return Arc::clone(existing);
            }
            log::debug!("pid {} reused; new profile incarnation", pid);
        }

        let fresh = Arc::new(Mutex::new(ProcessProfile::new(pid, now)));
        profiles.insert(pid, Arc::clone(&fresh));
        fresh
    }

    fn get(&self, pid: u32) -> Option<ProfileRef> {
        self.profiles.read().get(&pid).cloned()
    }

    // ========================================================================
    // OPERATOR / FAIL-SAFE TRANSITIONS
    // ========================================================================

    /// Operator resolution (e.g. after restore); terminal for the incarnation
    pub fn resolve(&self, pid: u32, reason: &str) -> Result<Transition, ArbiterError> {
        let profile = self.get(pid).ok_or(ArbiterError::UnknownProcess(pid))?;
        let mut p = profile.lock();
        let from = p.state;
        p.advance(ProcessState::Resolved, Instant::now(), reason)
            .ok_or(ArbiterError::InvalidTransition {
                pid,
                from,
                to: ProcessState::Resolved,
            })
    }

    /// Contain `pid` regardless of score (triage failure)
    pub fn force_contain(&self, pid: u32, reason: &str) -> Option<Transition> {
        let now = Instant::now();
        let profile = self
            .profiles
            .write()
            .entry(pid)
            .or_insert_with(|| Arc::new(Mutex::new(ProcessProfile::new(pid, now))))
            .clone();

        let mut p = profile.lock();
        p.last_seen = now;
        p.advance(ProcessState::Contained, now, reason)
    }

    pub fn state_of(&self, pid: u32) -> Option<ProcessState> {
        self.get(pid).map(|p| p.lock().state)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Dwell containment, auto-resolve and eviction
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let policy = self.policy();
        let mut report = SweepReport::default();
        let profiles: Vec<(u32, ProfileRef)> = self
            .profiles
            .read()
            .iter()
            .map(|(pid, p)| (*pid, Arc::clone(p)))
            .collect();

        let mut evict = Vec::new();

        for (pid, profile) in profiles {
            let mut p = profile.lock();

            if p.state == ProcessState::Escalated && dwell_exceeded(&mut p, now, &policy) {
                if let Some(t) = p.advance(ProcessState::Contained, now, "escalation dwell exceeded") {
                    report.captures.extend(lookback_captures(&p, now, &policy, None));
                    report.transitions.push(t);
                }
            }

            if p.state == ProcessState::Contained {
                if let Some(after) = policy.auto_resolve() {
                    if now.saturating_duration_since(p.state_since) >= after {
                        report.transitions.extend(p.advance(ProcessState::Resolved, now, "auto-resolve timeout"));
                    }
                }
            }

            let expired = match p.terminated_at {
                Some(at) => now.saturating_duration_since(at) >= policy.termination_grace(),
                None => now.saturating_duration_since(p.last_seen) >= policy.idle_eviction(),
            };
            if expired {
                evict.push((pid, Arc::clone(&profile)));
            }
        }

        if !evict.is_empty() {
            let mut table = self.profiles.write();
            for (pid, profile) in evict {
                // Only if no new incarnation replaced it meanwhile
                if table.get(&pid).map_or(false, |p| Arc::ptr_eq(p, &profile)) {
                    table.remove(&pid);
                    report.evicted.push(pid);
                }
            }
        }

        for t in &report.transitions {
            log::warn!("pid {}: {} -> {} ({})", t.pid, t.from, t.to, t.reason);
        }
        report
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn profiles(&self) -> Vec<ProfileSummary> {
        let now = Instant::now();
        let window = self.policy.read().risk_window();
        let mut summaries: Vec<_> = self
            .profiles
            .read()
            .values()
            .map(|p| p.lock().summary(now, window))
            .collect();
        summaries.sort_by_key(|s| s.pid);
        summaries
    }

    pub fn profile(&self, pid: u32) -> Option<ProfileSummary> {
        let window = self.policy.read().risk_window();
        self.get(pid).map(|p| p.lock().summary(Instant::now(), window))
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

impl PathOwnership for DecisionArbiter {
    fn owner_of(&self, path: &Path, capturing_pid: u32) -> Option<u32> {
        self.profiles
            .read()
            .iter()
            .filter(|(pid, _)| **pid != capturing_pid)
            .find(|(_, p)| {
                let p = p.lock();
                p.is_live() && p.has_touched(path)
            })
            .map(|(pid, _)| *pid)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Path worth capturing for this event, if any
fn artifact_path(event: &KernelEvent) -> Option<String> {
    if event.kind().touches_artifact() && !event.path().is_empty() {
        Some(event.path().to_string())
    } else {
        None
    }
}

fn dwell_exceeded(p: &mut ProcessProfile, now: Instant, policy: &ArbiterPolicy) -> bool {
    now.saturating_duration_since(p.state_since) >= policy.escalation_dwell()
        && p.is_hot(now, policy.risk_window(), policy.cumulative_risk_threshold)
}

fn lookback_captures(
    p: &ProcessProfile,
    now: Instant,
    policy: &ArbiterPolicy,
    already: Option<&str>,
) -> Vec<CaptureRequest> {
    let skip = already.map(crate::logic::features::path::normalize);
    p.touched_within(now, policy.lookback())
        .into_iter()
        .filter(|path| {
            skip.as_deref()
                .map_or(true, |s| crate::logic::features::path::normalize(&path.to_string_lossy()) != s)
        })
        .map(|path| CaptureRequest {
            path,
            pid: p.pid,
            reason: CaptureReason::Containment,
        })
        .collect()
}
