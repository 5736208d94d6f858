//! Triage Worker
//!
//! One pipeline invocation per dequeued event:
//! extract -> score (re-submit while stale) -> classify -> arbitrate ->
//! vault captures -> deliver.
//!
//! A panic anywhere in that chain is contained to the event: it gets a
//! fail-safe Block and its process is contained.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::enforcement::EnforcementSink;
use crate::logic::arbiter::{CaptureRequest, Decision, DecisionArbiter, Transition};
use crate::logic::features::{FeatureExtractor, FeatureRecord};
use crate::logic::model::InferenceEngine;
use crate::logic::queue::{Dequeued, EventQueue};
use crate::logic::sensor::KernelEvent;
use crate::logic::telemetry::{SecurityEvent, Telemetry};
use crate::logic::threat::{classify, ThreatLevel, ThreatScore, Verdict, VerdictOrigin};
use crate::logic::vault::{VaultError, VaultManager};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub extraction_fallbacks: u64,
    pub stale_resubmits: u64,
    pub stale_exhausted: u64,
    pub panics: u64,
    pub captures: u64,
    pub capture_failures: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    extraction_fallbacks: AtomicU64,
    stale_resubmits: AtomicU64,
    stale_exhausted: AtomicU64,
    panics: AtomicU64,
    captures: AtomicU64,
    capture_failures: AtomicU64,
}

/// Everything a worker needs, owned by the service and shared by `Arc`
pub struct Pipeline {
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) extractor: FeatureExtractor,
    pub(crate) engine: Arc<InferenceEngine>,
    pub(crate) arbiter: Arc<DecisionArbiter>,
    pub(crate) vault: Arc<VaultManager>,
    pub(crate) sink: Arc<dyn EnforcementSink>,
    pub(crate) telemetry: Telemetry,
    pub(crate) max_resubmits: u32,
    counters: Counters,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<EventQueue>,
        extractor: FeatureExtractor,
        engine: Arc<InferenceEngine>,
        arbiter: Arc<DecisionArbiter>,
        vault: Arc<VaultManager>,
        sink: Arc<dyn EnforcementSink>,
        telemetry: Telemetry,
        max_resubmits: u32,
    ) -> Self {
        Self {
            queue,
            extractor,
            engine,
            arbiter,
            vault,
            sink,
            telemetry,
            max_resubmits,
            counters: Counters::default(),
        }
    }

    /// Worker loop: runs until the queue is closed and drained
    pub fn run_worker(&self) {
        while let Ok(item) = self.queue.dequeue() {
            self.process(item);
        }
    }

    pub fn process(&self, item: Dequeued) {
        let Dequeued { ticket, event } = item;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let decision = self.triage(&event);
            self.apply(&decision);
            decision.verdict
        }));

        let verdict = match outcome {
            Ok(verdict) => verdict,
            Err(payload) => self.fail_safe(&event, payload),
        };

        let sink = &self.sink;
        if self.queue.finish(ticket, || sink.deliver(&verdict)) {
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
            log::debug!("{} pid {} -> {}", verdict.event_id, verdict.pid, verdict.action);
            self.telemetry.record(SecurityEvent::verdict_issued(&verdict));
        }
    }

    /// Extract, score and arbitrate one event
    pub fn triage(&self, event: &KernelEvent) -> Decision {
        let (record, origin) = match self.extractor.extract(event) {
            Ok(record) => (record, VerdictOrigin::Scored),
            Err(e) => {
                log::warn!("Extraction failed for {} (pid {}): {}", event.id(), event.pid(), e);
                self.counters.extraction_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.telemetry.record(SecurityEvent::extraction_fallback(
                    event.pid(),
                    event.id(),
                    &e.to_string(),
                ));
                (FeatureRecord::worst_case(event), VerdictOrigin::ExtractionFallback)
            }
        };

        match self.score(&record, event) {
            Some(score) => {
                let level = classify(score.probability);
                self.arbiter.decide(event, Some(score.probability), level, origin)
            }
            None => {
                self.counters.stale_exhausted.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "No fresh score for {} after {} re-submissions; failing toward Block",
                    event.id(),
                    self.max_resubmits
                );
                self.arbiter.decide(event, None, ThreatLevel::Malicious, VerdictOrigin::StaleExhausted)
            }
        }
    }

    /// Score under the current generation; re-submit while the result is stale
    fn score(&self, record: &FeatureRecord, event: &KernelEvent) -> Option<ThreatScore> {
        for attempt in 0..=self.max_resubmits {
            match self.engine.score(record, self.engine.generation()) {
                Ok(score) => return Some(score),
                Err(stale) => {
                    log::warn!("{}: {} (attempt {})", event.id(), stale, attempt + 1);
                    self.counters.stale_resubmits.fetch_add(1, Ordering::Relaxed);
                    self.telemetry.record(SecurityEvent::stale_resubmit(
                        event.pid(),
                        event.id(),
                        attempt + 1,
                        stale.issued,
                        stale.current,
                    ));
                }
            }
        }
        None
    }

    /// Side effects of a decision; no profile lock is held here
    fn apply(&self, decision: &Decision) {
        self.record_transitions(&decision.transitions);
        if decision.contained() {
            self.sink.contain_process(decision.verdict.pid);
        }
        self.capture(&decision.captures);
    }

    pub(crate) fn record_transitions(&self, transitions: &[Transition]) {
        for t in transitions {
            self.telemetry
                .record(SecurityEvent::state_transition(t.pid, t.from, t.to, &t.reason));
        }
    }

    /// Vault captures; failures are surfaced, never retried
    pub(crate) fn capture(&self, requests: &[CaptureRequest]) {
        for request in requests {
            match self.vault.capture(&request.path, request.pid, request.reason) {
                Ok(entry) => {
                    self.counters.captures.fetch_add(1, Ordering::Relaxed);
                    self.telemetry.record(SecurityEvent::vault_capture(&entry));
                }
                Err(VaultError::IoFailure { ref source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    log::warn!("Capture skipped, {} no longer exists", request.path.display());
                }
                Err(e) => {
                    self.counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("Capture of {} failed: {}", request.path.display(), e);
                    self.telemetry.record(SecurityEvent::vault_failure(
                        "capture",
                        &request.path.display().to_string(),
                        &e.to_string(),
                    ));
                }
            }
        }
    }

    fn fail_safe(&self, event: &KernelEvent, payload: Box<dyn Any + Send>) -> Verdict {
        let detail = panic_message(payload.as_ref());
        self.counters.panics.fetch_add(1, Ordering::Relaxed);
        log::error!(
            "Triage panicked for {} (pid {}): {}; issuing fail-safe Block",
            event.id(),
            event.pid(),
            detail
        );
        self.telemetry
            .record(SecurityEvent::integrity_violation(event.pid(), event.id(), &detail));

        if let Some(t) = self.arbiter.force_contain(event.pid(), "triage failure") {
            self.record_transitions(std::slice::from_ref(&t));
            self.sink.contain_process(event.pid());
        }
        Verdict::fail_safe(event.id(), event.pid())
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            processed: c.processed.load(Ordering::Relaxed),
            extraction_fallbacks: c.extraction_fallbacks.load(Ordering::Relaxed),
            stale_resubmits: c.stale_resubmits.load(Ordering::Relaxed),
            stale_exhausted: c.stale_exhausted.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
            captures: c.captures.load(Ordering::Relaxed),
            capture_failures: c.capture_failures.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
