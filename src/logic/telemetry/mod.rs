//! Telemetry Module
//!
//! Security audit trail: every verdict, state transition, backend switch and
//! vault operation ends up as one JSONL line.
//!
//! ## Structure
//! - `event.rs` - `SecurityEvent` (immutable, timestamped)
//! - `recorder.rs` - append-only JSONL writer + `Telemetry` handle
//!
//! ## Usage
//! ```ignore
//! let telemetry = Telemetry::open(&config.telemetry, &config.data_dir)?;
//! telemetry.record(SecurityEvent::verdict_issued(&verdict));
//! telemetry.shutdown(uptime_secs);
//! ```

pub mod event;
pub mod recorder;

pub use event::{get_session_id, EventType, SecurityEvent};
pub use recorder::{
    count_events_by_type, list_log_files, read_events, Recorder, RecorderStats, Telemetry,
    TelemetryConfig,
};
