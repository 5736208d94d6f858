//! Arbiter state machine scenarios

#[cfg(test)]
mod integration_tests {
    use std::path::Path;
    use std::time::{Duration, Instant};

    use crate::logic::arbiter::*;
    use crate::logic::sensor::{EventKind, KernelEvent};
    use crate::logic::threat::{classify, ThreatLevel, VerdictAction, VerdictOrigin};
    use crate::logic::vault::{CaptureReason, PathOwnership};

    fn arbiter() -> DecisionArbiter {
        DecisionArbiter::new(ArbiterPolicy::default()).unwrap()
    }

    fn ev(id: u64, pid: u32, kind: EventKind, path: &str) -> KernelEvent {
        KernelEvent::new(id, id * 10, pid, 1, kind, path, vec![]).unwrap()
    }

    fn decide(a: &DecisionArbiter, event: &KernelEvent, score: f32, now: Instant) -> Decision {
        a.decide_at(event, Some(score), classify(score), VerdictOrigin::Scored, now)
    }

    #[test]
    fn test_scenario_allow_vault_block() {
        let a = arbiter();
        let t = Instant::now();

        decide(&a, &ev(1, 100, EventKind::ProcessCreate, "C:\\Temp\\tool.exe"), 0.05, t);
        let d1 = decide(&a, &ev(2, 100, EventKind::FileWrite, "C:\\Data\\a.txt"), 0.1, t);
        let d2 = decide(&a, &ev(3, 100, EventKind::FileWrite, "C:\\Data\\b.txt"), 0.55, t);
        let d3 = decide(&a, &ev(4, 100, EventKind::FileWrite, "C:\\Data\\c.txt"), 0.9, t);

        assert_eq!(d1.verdict.action, VerdictAction::Allow);
        assert_eq!(d2.verdict.action, VerdictAction::Vault);
        assert_eq!(d3.verdict.action, VerdictAction::Block);
        assert_eq!(a.state_of(100), Some(ProcessState::Contained));

        assert_eq!(d2.captures.len(), 1);
        assert_eq!(d2.captures[0].reason, CaptureReason::RiskyArtifact);
        assert_eq!(d2.transitions[0].to, ProcessState::Escalated);

        // Event path first, then lookback over everything else touched
        assert!(d3.contained());
        assert_eq!(d3.captures[0].path, Path::new("C:\\Data\\c.txt"));
        let paths: Vec<_> = d3.captures.iter().map(|c| c.path.clone()).collect();
        assert!(paths.contains(&"C:\\Data\\a.txt".into()));
        assert!(paths.contains(&"C:\\Temp\\tool.exe".into()));
        assert_eq!(paths.iter().filter(|p| p.to_string_lossy().ends_with("c.txt")).count(), 1);
        assert!(d3.captures.iter().all(|c| c.pid == 100 && c.reason == CaptureReason::Containment));
    }

    #[test]
    fn test_never_downgrades() {
        let a = arbiter();
        let t = Instant::now();

        decide(&a, &ev(1, 5, EventKind::FileWrite, "/home/u/x"), 0.6, t);
        let later = decide(&a, &ev(2, 5, EventKind::FileCreate, "/home/u/y"), 0.05, t);
        assert_eq!(later.verdict.action, VerdictAction::Vault);
        assert_eq!(later.verdict.level, ThreatLevel::Clean);
        assert_eq!(a.state_of(5), Some(ProcessState::Escalated));

        decide(&a, &ev(3, 5, EventKind::FileWrite, "/home/u/z"), 0.95, t);
        let after = decide(&a, &ev(4, 5, EventKind::FileCreate, "/home/u/w"), 0.0, t);
        assert_eq!(after.verdict.action, VerdictAction::Block);
        assert!(after.transitions.is_empty());
    }

    #[test]
    fn test_cumulative_suspicious_escalates() {
        let a = arbiter();
        let t = Instant::now();

        let mut escalated_at = None;
        for i in 0..5 {
            let d = decide(&a, &ev(i, 9, EventKind::FileCreate, "/tmp/f"), 0.45, t + Duration::from_secs(i));
            if !d.transitions.is_empty() {
                escalated_at = Some(i);
                assert!(d.transitions[0].reason.starts_with("cumulative risk"));
                break;
            }
        }
        // 0.45 * 3 = 1.35 >= 1.2
        assert_eq!(escalated_at, Some(2));
        assert_eq!(a.state_of(9), Some(ProcessState::Escalated));
    }

    #[test]
    fn test_spread_out_suspicious_does_not_escalate() {
        let a = arbiter();
        let t = Instant::now();

        for i in 0..5u64 {
            decide(&a, &ev(i, 9, EventKind::FileCreate, "/tmp/f"), 0.45, t + Duration::from_secs(i * 61));
        }
        assert_eq!(a.state_of(9), Some(ProcessState::Observing));
    }

    #[test]
    fn test_escalated_writes_snapshot() {
        let a = arbiter();
        let t = Instant::now();

        decide(&a, &ev(1, 3, EventKind::FileWrite, "/data/a"), 0.45, t);
        decide(&a, &ev(2, 3, EventKind::FileWrite, "/data/b"), 0.45, t);
        decide(&a, &ev(3, 3, EventKind::FileWrite, "/data/c"), 0.45, t);
        assert_eq!(a.state_of(3), Some(ProcessState::Escalated));

        let d = decide(&a, &ev(4, 3, EventKind::FileDelete, "/data/d"), 0.3, t);
        assert_eq!(d.verdict.action, VerdictAction::Monitor);
        assert_eq!(d.captures.len(), 1);
        assert_eq!(d.captures[0].reason, CaptureReason::Snapshot);

        // Network events carry no artifact
        let n = decide(&a, &ev(5, 3, EventKind::NetworkConnect, "10.0.0.1:443"), 0.3, t);
        assert!(n.captures.is_empty());
    }

    #[test]
    fn test_dwell_contains_hot_process() {
        let a = arbiter();
        let t = Instant::now();
        let dwell = Duration::from_secs(ArbiterPolicy::default().escalation_dwell_secs);

        decide(&a, &ev(1, 4, EventKind::FileWrite, "/data/a"), 0.6, t);
        // Still hot: another risky event inside the risk window at dwell expiry
        decide(&a, &ev(2, 4, EventKind::FileWrite, "/data/b"), 0.6, t + dwell - Duration::from_secs(10));
        let d = decide(&a, &ev(3, 4, EventKind::FileWrite, "/data/c"), 0.25, t + dwell);
        assert!(d.contained());
        assert_eq!(d.verdict.action, VerdictAction::Block);
    }

    #[test]
    fn test_dwell_spares_cooled_process() {
        let a = arbiter();
        let t = Instant::now();
        let dwell = Duration::from_secs(ArbiterPolicy::default().escalation_dwell_secs);

        decide(&a, &ev(1, 4, EventKind::FileWrite, "/data/a"), 0.6, t);
        let report = a.sweep(t + dwell);
        assert!(report.transitions.is_empty());
        assert_eq!(a.state_of(4), Some(ProcessState::Escalated));
    }

    #[test]
    fn test_sweep_dwell_containment() {
        let a = arbiter();
        let t = Instant::now();
        let policy = ArbiterPolicy::default();
        let dwell = Duration::from_secs(policy.escalation_dwell_secs);

        decide(&a, &ev(1, 8, EventKind::FileWrite, "/data/a"), 0.6, t);
        decide(&a, &ev(2, 8, EventKind::FileWrite, "/data/b"), 0.6, t + dwell - Duration::from_secs(1));

        let report = a.sweep(t + dwell);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].to, ProcessState::Contained);
        assert_eq!(report.captures.len(), 2);
    }

    #[test]
    fn test_resolved_is_terminal_and_pid_reuse() {
        let a = arbiter();
        let t = Instant::now();

        decide(&a, &ev(1, 50, EventKind::FileWrite, "/x"), 0.9, t);
        let first = a.profile(50).unwrap().incarnation;
        a.resolve(50, "operator restore").unwrap();
        assert!(matches!(
            a.resolve(50, "again"),
            Err(ArbiterError::InvalidTransition { from: ProcessState::Resolved, .. })
        ));

        // Resolved: judged on the event alone, no further transitions
        let d = decide(&a, &ev(2, 50, EventKind::FileWrite, "/y"), 0.3, t);
        assert_eq!(d.verdict.action, VerdictAction::Monitor);
        assert_eq!(a.state_of(50), Some(ProcessState::Resolved));

        // OS reuses the pid
        let d = decide(&a, &ev(3, 50, EventKind::ProcessCreate, "/bin/new"), 0.0, t);
        assert_eq!(d.verdict.action, VerdictAction::Allow);
        let second = a.profile(50).unwrap();
        assert_ne!(second.incarnation, first);
        assert_eq!(second.state, ProcessState::Observing);
    }

    #[test]
    fn test_new_image_on_live_pid_starts_fresh_profile() {
        let a = arbiter();
        let t = Instant::now();

        decide(&a, &ev(1, 70, EventKind::ProcessCreate, "C:\\Temp\\dropper.exe"), 0.0, t);
        decide(&a, &ev(2, 70, EventKind::FileWrite, "C:\\Data\\a.txt"), 0.95, t);
        assert_eq!(a.state_of(70), Some(ProcessState::Contained));
        let first = a.profile(70).unwrap().incarnation;

        // Terminate was never seen; same image again is the same process
        decide(&a, &ev(3, 70, EventKind::ProcessCreate, "c:/temp/DROPPER.exe"), 0.0, t);
        assert_eq!(a.profile(70).unwrap().incarnation, first);

        let d = decide(&a, &ev(4, 70, EventKind::ProcessCreate, "C:\\Windows\\notepad.exe"), 0.0, t);
        assert_eq!(d.verdict.action, VerdictAction::Allow);
        let second = a.profile(70).unwrap();
        assert_ne!(second.incarnation, first);
        assert_eq!(second.state, ProcessState::Observing);
        assert_eq!(second.image.as_deref(), Some("C:\\Windows\\notepad.exe"));
    }

    #[test]
    fn test_termination_grace_eviction() {
        let a = arbiter();
        let t = Instant::now();
        let grace = Duration::from_secs(ArbiterPolicy::default().termination_grace_secs);

        decide(&a, &ev(1, 60, EventKind::ProcessCreate, "/bin/a"), 0.0, t);
        decide(&a, &ev(2, 60, EventKind::ProcessTerminate, ""), 0.0, t);

        assert!(a.sweep(t + grace - Duration::from_secs(1)).evicted.is_empty());
        // Late event inside the grace period still lands on the same profile
        decide(&a, &ev(3, 60, EventKind::FileWrite, "/late"), 0.0, t);
        assert_eq!(a.sweep(t + grace).evicted, vec![60]);
        assert!(a.is_empty());
    }

    #[test]
    fn test_auto_resolve() {
        let policy = ArbiterPolicy {
            auto_resolve_secs: Some(60),
            ..Default::default()
        };
        let a = DecisionArbiter::new(policy).unwrap();
        let t = Instant::now();

        decide(&a, &ev(1, 70, EventKind::FileWrite, "/x"), 0.9, t);
        assert!(a.sweep(t + Duration::from_secs(30)).transitions.is_empty());
        let report = a.sweep(t + Duration::from_secs(61));
        assert_eq!(report.transitions[0].to, ProcessState::Resolved);
    }

    #[test]
    fn test_force_contain() {
        let a = arbiter();
        let t = a.force_contain(11, "triage panic").unwrap();
        assert_eq!(t.to, ProcessState::Contained);
        assert!(a.force_contain(11, "again").is_none());
    }

    #[test]
    fn test_path_ownership() {
        let a = arbiter();
        let t = Instant::now();

        decide(&a, &ev(1, 20, EventKind::FileWrite, "/shared/doc.txt"), 0.1, t);
        decide(&a, &ev(2, 21, EventKind::FileWrite, "/shared/doc.txt"), 0.9, t);

        assert_eq!(a.owner_of(Path::new("/shared/doc.txt"), 21), Some(20));
        assert_eq!(a.owner_of(Path::new("/shared/other.txt"), 21), None);

        decide(&a, &ev(3, 20, EventKind::ProcessTerminate, ""), 0.0, t);
        assert_eq!(a.owner_of(Path::new("/shared/doc.txt"), 21), None);
    }

    #[test]
    fn test_policy_update_validated() {
        let a = arbiter();
        let bad = ArbiterPolicy {
            risk_window_secs: 0,
            ..Default::default()
        };
        assert!(a.update_policy(bad).is_err());
        assert!(a.update_policy(ArbiterPolicy::strict()).is_ok());
        assert_eq!(a.policy(), ArbiterPolicy::strict());
    }
}
