//! Process Profile
//!
//! Accumulated threat history for one process incarnation.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::features::path::normalize;
use crate::logic::threat::{ThreatLevel, RISKY_MIN};

// ============================================================================
// STATE
// ============================================================================

/// Forward-only: Observing < Escalated < Contained < Resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Observing,
    Escalated,
    Contained,
    /// Terminal for this incarnation
    Resolved,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Observing => "observing",
            ProcessState::Escalated => "escalated",
            ProcessState::Contained => "contained",
            ProcessState::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub pid: u32,
    pub incarnation: Uuid,
    pub from: ProcessState,
    pub to: ProcessState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

// ============================================================================
// PROFILE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProcessProfile {
    pub pid: u32,
    pub incarnation: Uuid,
    /// Image path from ProcessCreate, if seen
    pub image: Option<String>,
    pub state: ProcessState,
    pub state_since: Instant,
    pub first_seen: DateTime<Utc>,
    pub last_seen: Instant,
    pub terminated_at: Option<Instant>,
    pub counts: [u64; 4],
    pub highest: ThreatLevel,
    risk_window: VecDeque<(Instant, f32)>,
    touched: VecDeque<(Instant, PathBuf)>,
    pub transitions: Vec<Transition>,
}

impl ProcessProfile {
    pub fn new(pid: u32, now: Instant) -> Self {
        Self {
            pid,
            incarnation: Uuid::new_v4(),
            image: None,
            state: ProcessState::Observing,
            state_since: now,
            first_seen: Utc::now(),
            last_seen: now,
            terminated_at: None,
            counts: [0; 4],
            highest: ThreatLevel::Clean,
            risk_window: VecDeque::new(),
            touched: VecDeque::new(),
            transitions: Vec::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.terminated_at.is_none() && self.state != ProcessState::Resolved
    }

    /// Move forward to `to`. Returns `None` (and changes nothing) for a
    /// same-or-backward move.
    pub fn advance(&mut self, to: ProcessState, now: Instant, reason: &str) -> Option<Transition> {
        if to <= self.state {
            return None;
        }
        let transition = Transition {
            pid: self.pid,
            incarnation: self.incarnation,
            from: self.state,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        };
        self.state = to;
        self.state_since = now;
        self.transitions.push(transition.clone());
        Some(transition)
    }

    pub fn record_risk(&mut self, score: f32, now: Instant) {
        self.risk_window.push_back((now, score));
    }

    /// Sum of scores inside the window; older samples are dropped
    pub fn cumulative_risk(&mut self, now: Instant, window: Duration) -> f32 {
        while let Some(&(at, _)) = self.risk_window.front() {
            if now.saturating_duration_since(at) > window {
                self.risk_window.pop_front();
            } else {
                break;
            }
        }
        self.risk_window.iter().map(|(_, s)| s).sum()
    }

    /// Still showing risky behaviour: a Risky-or-worse score in the window,
    /// or cumulative risk at the threshold
    pub fn is_hot(&mut self, now: Instant, window: Duration, threshold: f32) -> bool {
        let cumulative = self.cumulative_risk(now, window);
        cumulative >= threshold || self.risk_window.iter().any(|&(_, s)| s >= RISKY_MIN)
    }

    pub fn record_touch(&mut self, path: &str, now: Instant, max: usize) {
        self.touched.push_back((now, PathBuf::from(path)));
        while self.touched.len() > max {
            self.touched.pop_front();
        }
    }

    /// Distinct paths touched at or after `now - lookback`, oldest first
    pub fn touched_within(&self, now: Instant, lookback: Duration) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.touched
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= lookback)
            .filter(|(_, p)| seen.insert(normalize(&p.to_string_lossy())))
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn has_touched(&self, path: &Path) -> bool {
        let wanted = normalize(&path.to_string_lossy());
        self.touched
            .iter()
            .any(|(_, p)| normalize(&p.to_string_lossy()) == wanted)
    }

    pub fn summary(&self, now: Instant, window: Duration) -> ProfileSummary {
        let cumulative_risk = self
            .risk_window
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= window)
            .map(|(_, s)| s)
            .sum();

        ProfileSummary {
            pid: self.pid,
            incarnation: self.incarnation,
            image: self.image.clone(),
            state: self.state,
            first_seen: self.first_seen,
            idle_secs: now.saturating_duration_since(self.last_seen).as_secs(),
            terminated: self.terminated_at.is_some(),
            counts: LevelCounts {
                clean: self.counts[ThreatLevel::Clean.index()],
                suspicious: self.counts[ThreatLevel::Suspicious.index()],
                risky: self.counts[ThreatLevel::Risky.index()],
                malicious: self.counts[ThreatLevel::Malicious.index()],
            },
            highest_level: self.highest,
            cumulative_risk,
            touched_paths: self.touched.len(),
            transitions: self.transitions.clone(),
        }
    }
}

// ============================================================================
// SUMMARY (operator boundary)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub clean: u64,
    pub suspicious: u64,
    pub risky: u64,
    pub malicious: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub pid: u32,
    pub incarnation: Uuid,
    pub image: Option<String>,
    pub state: ProcessState,
    pub first_seen: DateTime<Utc>,
    pub idle_secs: u64,
    pub terminated: bool,
    pub counts: LevelCounts,
    pub highest_level: ThreatLevel,
    pub cumulative_risk: f32,
    pub touched_paths: usize,
    pub transitions: Vec<Transition>,
}
