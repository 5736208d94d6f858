//! Inference Engine - backend dispatch with generation tagging
//!
//! `score` pins the active backend, runs it, and tags the result with the
//! generation the request was issued under. A result whose issuing
//! generation is more than one switch behind the current one is rejected
//! as stale; the caller re-submits.
//!
//! A failing backend never loses a request: the built-in heuristic scores
//! it instead. The same happens for a NaN result; anything else outside
//! [0, 1] is clamped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backend::{BackendKind, HeuristicBackend, InferenceError, ScoringBackend};
use super::gear::{BackendState, GearControl, SwitchReport};
use super::onnx::OnnxBackend;
use crate::logic::features::FeatureRecord;
use crate::logic::threat::ThreatScore;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// ONNX model for the high-power backend; heuristic if absent
    pub model_path: Option<PathBuf>,
    pub initial_backend: BackendKind,
    /// Upper bound on waiting for the outgoing backend during a switch
    pub drain_timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            initial_backend: BackendKind::LowPower,
            drain_timeout_ms: 2_000,
        }
    }
}

impl InferenceConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// ============================================================================
// STALENESS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale backend result: issued at generation {issued}, now {current}")]
pub struct StaleBackend {
    pub issued: u64,
    pub current: u64,
}

/// A result is stale once more than one switch happened since issue
pub fn is_stale(issued: u64, current: u64) -> bool {
    current.saturating_sub(issued) > 1
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub backend: BackendState,
    pub low_power_backend: String,
    pub high_power_backend: String,
    pub low_power_requests: u64,
    pub high_power_requests: u64,
    pub fallbacks: u64,
    pub stale_rejections: u64,
    pub avg_latency_ms: f32,
}

#[derive(Default)]
struct Counters {
    requests: [AtomicU64; 2],
    fallbacks: AtomicU64,
    stale: AtomicU64,
    latency_us_sum: AtomicU64,
    latency_count: AtomicU64,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct InferenceEngine {
    gear: GearControl,
    backends: [Arc<dyn ScoringBackend>; 2],
    fallback: HeuristicBackend,
    drain_timeout: Duration,
    /// Outgoing backend whose drain timed out; released once idle
    pending_release: Mutex<Option<BackendKind>>,
    counters: Counters,
}

impl InferenceEngine {
    pub fn new(
        low_power: Arc<dyn ScoringBackend>,
        high_power: Arc<dyn ScoringBackend>,
        initial: BackendKind,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            gear: GearControl::new(initial),
            backends: [low_power, high_power],
            fallback: HeuristicBackend::low_power(),
            drain_timeout,
            pending_release: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Heuristic low-power backend; ONNX high-power backend when a model is
    /// configured and loads, deeper heuristic otherwise.
    pub fn from_config(config: &InferenceConfig) -> Self {
        let high: Arc<dyn ScoringBackend> = match &config.model_path {
            Some(path) => match OnnxBackend::load(path) {
                Ok(onnx) => Arc::new(onnx),
                Err(e) => {
                    log::warn!("High-power model unavailable ({}); using heuristic", e);
                    Arc::new(HeuristicBackend::high_power())
                }
            },
            None => Arc::new(HeuristicBackend::high_power()),
        };

        Self::new(
            Arc::new(HeuristicBackend::low_power()),
            high,
            config.initial_backend,
            config.drain_timeout(),
        )
    }

    pub fn generation(&self) -> u64 {
        self.gear.generation()
    }

    pub fn current_backend(&self) -> BackendKind {
        self.gear.current()
    }

    pub fn backend_state(&self) -> BackendState {
        self.gear.snapshot()
    }

    pub fn in_flight(&self, kind: BackendKind) -> usize {
        self.gear.in_flight(kind)
    }

    /// Score one record under the generation it was issued at
    pub fn score(&self, record: &FeatureRecord, issued: u64) -> Result<ThreatScore, StaleBackend> {
        self.check_fresh(issued)?;

        let start = Instant::now();
        let probability;
        let kind;
        {
            let (active, _guard) = self.gear.enter();
            kind = active;
            self.counters.requests[kind.index()].fetch_add(1, Ordering::Relaxed);

            probability = match self.backends[kind.index()].score(record) {
                Ok(p) if !p.is_nan() => p.clamp(0.0, 1.0),
                Ok(_) => {
                    log::warn!(
                        "{} backend returned NaN for {}; falling back to heuristic",
                        kind,
                        record.event_id
                    );
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    self.fallback_score(record)
                }
                Err(e) => {
                    log::warn!(
                        "{} backend failed on {}: {}; falling back to heuristic",
                        kind,
                        record.event_id,
                        e
                    );
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    self.fallback_score(record)
                }
            };
        }

        self.counters
            .latency_us_sum
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.counters.latency_count.fetch_add(1, Ordering::Relaxed);

        self.check_fresh(issued)?;

        Ok(ThreatScore {
            event_id: record.event_id,
            probability,
            generation: issued,
            backend: kind,
        })
    }

    fn check_fresh(&self, issued: u64) -> Result<(), StaleBackend> {
        let current = self.gear.generation();
        if is_stale(issued, current) {
            self.counters.stale.fetch_add(1, Ordering::Relaxed);
            return Err(StaleBackend { issued, current });
        }
        Ok(())
    }

    fn fallback_score(&self, record: &FeatureRecord) -> f32 {
        // The heuristic is total over finite input; NaN is worst case
        match self.fallback.score(record) {
            Ok(p) if !p.is_nan() => p.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    /// Switch the active backend.
    ///
    /// The incoming backend is activated first; if that fails nothing
    /// changes. After the flip, waits (bounded) for in-flight requests on
    /// the outgoing backend, and only releases it if they all finished.
    /// Otherwise the release is deferred to `release_pending`.
    pub fn switch_to(
        &self,
        target: BackendKind,
        reason: &str,
    ) -> Result<Option<SwitchReport>, InferenceError> {
        let _switching = self.gear.lock_switch();

        let from = self.gear.current();
        if from == target {
            return Ok(None);
        }

        self.backends[target.index()].activate()?;
        {
            let mut pending = self.pending_release.lock();
            if *pending == Some(target) {
                // Coming back into service, nothing to release
                *pending = None;
            }
        }

        let start = Instant::now();
        let generation = self.gear.flip(target);
        let drained = self.gear.wait_drained(from, self.drain_timeout);
        let pending = self.gear.in_flight(from);

        if drained {
            self.backends[from.index()].release();
        } else {
            log::warn!(
                "Drain of {} backend timed out with {} request(s) running; release deferred",
                from,
                pending
            );
            *self.pending_release.lock() = Some(from);
        }

        log::info!(
            "Backend switched {} -> {} (generation {}, reason: {})",
            from,
            target,
            generation,
            reason
        );

        Ok(Some(SwitchReport {
            from,
            to: target,
            generation,
            drained,
            pending,
            drain_ms: start.elapsed().as_millis() as u64,
            reason: reason.to_string(),
        }))
    }

    /// Release a backend left behind by a timed-out drain once its last
    /// request has finished. Returns `true` if a release happened.
    pub fn release_pending(&self) -> bool {
        let _switching = self.gear.lock_switch();
        let mut pending = self.pending_release.lock();

        let kind = match *pending {
            Some(kind) => kind,
            None => return false,
        };
        if kind == self.gear.current() {
            *pending = None;
            return false;
        }
        if self.gear.in_flight(kind) > 0 {
            return false;
        }

        *pending = None;
        self.backends[kind.index()].release();
        log::info!("{} backend drained late; released", kind);
        true
    }

    pub fn stats(&self) -> EngineStats {
        let sum = self.counters.latency_us_sum.load(Ordering::Relaxed);
        let count = self.counters.latency_count.load(Ordering::Relaxed);
        let avg = if count > 0 { (sum as f32 / count as f32) / 1000.0 } else { 0.0 };

        EngineStats {
            backend: self.gear.snapshot(),
            low_power_backend: self.backends[0].name().to_string(),
            high_power_backend: self.backends[1].name().to_string(),
            low_power_requests: self.counters.requests[0].load(Ordering::Relaxed),
            high_power_requests: self.counters.requests[1].load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            stale_rejections: self.counters.stale.load(Ordering::Relaxed),
            avg_latency_ms: avg,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
