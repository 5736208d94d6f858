//! Model Module - Inference Engine and backend scheduling
//!
//! ## Structure
//! - `backend`: `ScoringBackend` trait, heuristic backends
//! - `onnx`: ONNX Runtime backend (high-power)
//! - `gear`: active backend, generation counter, drain tracking
//! - `inference`: `InferenceEngine` (score + switch)
//! - `scheduler`: `GearScheduler` (queue pressure -> backend)

pub mod backend;
pub mod onnx;
pub mod gear;
pub mod inference;
pub mod scheduler;

pub use backend::{BackendKind, HeuristicBackend, InferenceError, ScoringBackend};
pub use onnx::OnnxBackend;
pub use gear::{BackendState, SwitchReport};
pub use inference::{is_stale, EngineStats, InferenceConfig, InferenceEngine, StaleBackend};
pub use scheduler::{GearPolicy, GearScheduler, SchedulerConfig};
