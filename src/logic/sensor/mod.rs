//! Sensor Module - Kernel sensor boundary (inbound)
//!
//! ## Structure
//! - `types`: `KernelEvent`, `EventKind`, `EventId`
//! - `wire`: fixed-layout record decoding
//! - `replay`: JSONL / record-stream sources used by the binary

pub mod types;
pub mod wire;
pub mod replay;

pub use types::{EventError, EventId, EventKind, KernelEvent, MAX_CONTEXT_BYTES, MAX_PATH_UNITS};
pub use wire::RECORD_LEN;
pub use replay::{JsonLinesSource, RecordSource, ReplayError};
