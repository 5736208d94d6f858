//! Pipeline Module - Triage workers and service lifecycle
//!
//! ## Structure
//! - `enforcement`: `EnforcementSink` (outbound verdicts)
//! - `worker`: `Pipeline` (one event, end to end)
//! - `service`: `TriageService` (threads, submit, shutdown)

pub mod enforcement;
pub mod worker;
pub mod service;


pub use enforcement::{CollectingSink, EnforcementSink, JsonLinesSink};
pub use worker::{Pipeline, PipelineStats};
pub use service::{run_maintenance, ServiceError, ShutdownReport, TriageService};
