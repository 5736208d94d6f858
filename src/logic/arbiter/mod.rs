//! Arbiter Module - Decision Arbiter (per-process state machine)
//!
//! States per process incarnation, forward only:
//! `Observing -> Escalated -> Contained -> Resolved`
//!
//! ## Structure
//! - `profile`: `ProcessProfile`, `ProcessState`, summaries
//! - `policy`: `ArbiterPolicy` tunables
//! - `engine`: `DecisionArbiter` (decide, resolve, sweep)

use thiserror::Error;

pub mod profile;
pub mod policy;
pub mod engine;

#[cfg(test)]
mod tests;

pub use profile::{LevelCounts, ProcessProfile, ProcessState, ProfileSummary, Transition};
pub use policy::ArbiterPolicy;
pub use engine::{CaptureRequest, Decision, DecisionArbiter, SweepReport};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArbiterError {
    #[error("invalid arbiter policy: {0}")]
    InvalidPolicy(String),

    #[error("no profile for pid {0}")]
    UnknownProcess(u32),

    #[error("pid {pid} cannot go from {from} to {to}")]
    InvalidTransition {
        pid: u32,
        from: ProcessState,
        to: ProcessState,
    },
}
