//! Arbiter Policy
//!
//! Tunables for escalation, containment and profile lifetime. Updatable at
//! runtime through the operator API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ArbiterError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterPolicy {
    /// Sum of Suspicious-or-worse scores within the risk window that escalates
    pub cumulative_risk_threshold: f32,
    pub risk_window_secs: u64,
    /// Time in Escalated after which a still-hot process is contained
    pub escalation_dwell_secs: u64,
    /// How far back containment quarantines touched artifacts
    pub lookback_secs: u64,
    /// Profile retention after ProcessTerminate
    pub termination_grace_secs: u64,
    /// Profiles with no events this long are evicted
    pub idle_eviction_secs: u64,
    /// Contained processes resolve on their own after this long
    pub auto_resolve_secs: Option<u64>,
    pub max_touched_paths: usize,
    /// Capture a copy before an Escalated process writes or deletes a file
    pub snapshot_escalated_writes: bool,
}

impl Default for ArbiterPolicy {
    fn default() -> Self {
        Self {
            cumulative_risk_threshold: 1.2,
            risk_window_secs: 60,
            escalation_dwell_secs: 120,
            lookback_secs: 300,
            termination_grace_secs: 30,
            idle_eviction_secs: 1800,
            auto_resolve_secs: None,
            max_touched_paths: 256,
            snapshot_escalated_writes: true,
        }
    }
}

impl ArbiterPolicy {
    /// Escalates on fewer suspicious events and contains sooner
    pub fn strict() -> Self {
        Self {
            cumulative_risk_threshold: 0.8,
            risk_window_secs: 120,
            escalation_dwell_secs: 30,
            lookback_secs: 600,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ArbiterError> {
        if !(self.cumulative_risk_threshold > 0.0) || !self.cumulative_risk_threshold.is_finite() {
            return Err(ArbiterError::InvalidPolicy(
                "cumulative_risk_threshold must be positive".to_string(),
            ));
        }
        if self.risk_window_secs == 0 {
            return Err(ArbiterError::InvalidPolicy("risk_window_secs must be > 0".to_string()));
        }
        if self.max_touched_paths == 0 {
            return Err(ArbiterError::InvalidPolicy("max_touched_paths must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn risk_window(&self) -> Duration {
        Duration::from_secs(self.risk_window_secs)
    }

    pub fn escalation_dwell(&self) -> Duration {
        Duration::from_secs(self.escalation_dwell_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    pub fn auto_resolve(&self) -> Option<Duration> {
        self.auto_resolve_secs.map(Duration::from_secs)
    }
}
