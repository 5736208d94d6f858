//! Logic Module - Triage engines
//!
//! Flow: sensor -> queue -> features -> model -> threat -> arbiter -> vault,
//! driven by `pipeline`.
//!
//! - `sensor/` - inbound kernel events
//! - `queue` - bounded event queue with per-process affinity
//! - `features/` - feature extraction
//! - `model/` - inference backends and gear scheduling
//! - `threat/` - score classification and verdicts
//! - `arbiter/` - per-process state machine
//! - `vault/` - artifact capture, restore, purge
//! - `telemetry/` - security event log

pub mod sensor;
pub mod queue;
pub mod features;
pub mod model;
pub mod threat;
pub mod arbiter;
pub mod vault;
pub mod telemetry;
pub mod pipeline;
pub mod config;
