//! Triage Service - wires the engines together and owns the threads
//!
//! Threads:
//! - `cura-worker-N`: triage workers draining the event queue
//! - `cura-gear`: gear scheduler sampling queue depth
//! - `cura-maint`: arbiter sweep and vault retention

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::enforcement::EnforcementSink;
use super::worker::{Pipeline, PipelineStats};
use crate::constants;
use crate::logic::arbiter::{ArbiterError, DecisionArbiter, ProcessState};
use crate::logic::config::{AgentConfig, ConfigError};
use crate::logic::features::{ExtractionError, FeatureExtractor};
use crate::logic::model::{GearScheduler, InferenceEngine};
use crate::logic::queue::{EventQueue, QueueError};
use crate::logic::sensor::KernelEvent;
use crate::logic::telemetry::{SecurityEvent, Telemetry};
use crate::logic::threat::Verdict;
use crate::logic::vault::{VaultError, VaultManager};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Extractor(#[from] ExtractionError),

    #[error(transparent)]
    Arbiter(#[from] ArbiterError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Every accepted event got its verdict before the timeout
    pub drained: bool,
    /// Events that received a fail-safe Block instead
    pub unfinished: usize,
    pub uptime_secs: u64,
}

pub struct TriageService {
    config: AgentConfig,
    pipeline: Arc<Pipeline>,
    scheduler: Arc<GearScheduler>,
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
}

impl TriageService {
    pub fn new(config: AgentConfig, sink: Arc<dyn EnforcementSink>) -> Result<Self, ServiceError> {
        config.validate()?;
        let telemetry = Telemetry::open(&config.telemetry, &config.data_dir)?;
        let engine = Arc::new(InferenceEngine::from_config(&config.inference));
        Self::with_engine(config, sink, engine, telemetry)
    }

    /// Same as `new` with an injected engine and telemetry handle
    pub fn with_engine(
        config: AgentConfig,
        sink: Arc<dyn EnforcementSink>,
        engine: Arc<InferenceEngine>,
        telemetry: Telemetry,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let queue = Arc::new(EventQueue::new(config.queue.capacity));
        let extractor = FeatureExtractor::new(&config.extractor)?;
        let arbiter = Arc::new(DecisionArbiter::new(config.policy.clone())?);
        let vault = Arc::new(VaultManager::open(&config.vault, &config.data_dir)?);
        let scheduler = Arc::new(GearScheduler::new(config.scheduler.clone()));

        let pipeline = Arc::new(Pipeline::new(
            queue,
            extractor,
            engine,
            arbiter,
            vault,
            sink,
            telemetry,
            config.service.max_resubmits,
        ));

        Ok(Self {
            config,
            pipeline,
            scheduler,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn start(&self) -> Result<(), ServiceError> {
        let mut started = self.started_at.lock();
        if started.is_some() {
            return Err(ServiceError::AlreadyStarted);
        }

        let mut workers = self.workers.lock();
        for n in 0..self.config.service.workers {
            let pipeline = Arc::clone(&self.pipeline);
            let handle = thread::Builder::new()
                .name(format!("cura-worker-{}", n))
                .spawn(move || pipeline.run_worker())?;
            workers.push(handle);
        }

        let mut background = self.background.lock();
        background.push(Arc::clone(&self.scheduler).spawn(
            Arc::clone(&self.pipeline.engine),
            Arc::clone(&self.pipeline.queue),
            self.pipeline.telemetry.clone(),
            Arc::clone(&self.stop),
        )?);

        let pipeline = Arc::clone(&self.pipeline);
        let stop = Arc::clone(&self.stop);
        let interval = self.config.service.maintenance_interval();
        background.push(
            thread::Builder::new()
                .name("cura-maint".to_string())
                .spawn(move || maintenance_loop(&pipeline, &stop, interval))?,
        );

        *started = Some(Instant::now());
        self.pipeline
            .telemetry
            .record(SecurityEvent::system_start(constants::APP_VERSION));
        log::info!(
            "{} v{} started: {} workers, queue capacity {}, backend {}",
            constants::APP_NAME,
            constants::APP_VERSION,
            self.config.service.workers,
            self.config.queue.capacity,
            self.pipeline.engine.current_backend()
        );
        Ok(())
    }

    /// Hand an event to the queue. Never blocks.
    pub fn submit(&self, event: KernelEvent) -> Result<(), QueueError> {
        let (pid, id) = (event.pid(), event.id());
        match self.pipeline.queue.enqueue(event) {
            Err(QueueError::Full { capacity }) => {
                log::warn!("Queue full, {} (pid {}) rejected", id, pid);
                self.pipeline
                    .telemetry
                    .record(SecurityEvent::queue_overflow(pid, id, capacity));
                Err(QueueError::Full { capacity })
            }
            other => other,
        }
    }

    /// Stop accepting events, wait up to `timeout` for verdicts, then fail
    /// every remaining event safe.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let queue = &self.pipeline.queue;
        queue.close();
        let drained = queue.wait_idle(timeout);

        let mut unfinished = Vec::new();
        if !drained {
            let sink = &self.pipeline.sink;
            unfinished = queue.fail_remaining(|u| {
                sink.deliver(&Verdict::fail_safe(u.event_id, u.pid));
            });

            for u in &unfinished {
                log::error!(
                    "No verdict for {} (pid {}, {}) before shutdown timeout; failed safe",
                    u.event_id,
                    u.pid,
                    if u.was_in_flight { "in flight" } else { "queued" }
                );
                self.pipeline.telemetry.record(SecurityEvent::integrity_violation(
                    u.pid,
                    u.event_id,
                    "shutdown timeout",
                ));
                if let Some(t) = self.pipeline.arbiter.force_contain(u.pid, "shutdown timeout") {
                    self.pipeline.record_transitions(std::slice::from_ref(&t));
                    sink.contain_process(u.pid);
                }
            }
        }

        self.stop.store(true, Ordering::Release);
        for handle in self.background.lock().drain(..) {
            let _ = handle.join();
        }

        // A worker stuck in a backend call cannot be joined; its late
        // verdict is dropped by the queue.
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if drained {
            for handle in workers {
                let _ = handle.join();
            }
        }

        let started_at = *self.started_at.lock();
        let uptime_secs = started_at.map(|at| at.elapsed().as_secs()).unwrap_or(0);
        self.pipeline.telemetry.shutdown(uptime_secs);

        log::info!(
            "{} stopped after {}s ({} events failed safe)",
            constants::APP_NAME,
            uptime_secs,
            unfinished.len()
        );
        ShutdownReport {
            drained,
            unfinished: unfinished.len(),
            uptime_secs,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.pipeline.queue
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.pipeline.engine
    }

    pub fn scheduler(&self) -> &Arc<GearScheduler> {
        &self.scheduler
    }

    pub fn arbiter(&self) -> &Arc<DecisionArbiter> {
        &self.pipeline.arbiter
    }

    pub fn vault(&self) -> &Arc<VaultManager> {
        &self.pipeline.vault
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.pipeline.telemetry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}

// ============================================================================
// MAINTENANCE
// ============================================================================

fn maintenance_loop(pipeline: &Pipeline, stop: &AtomicBool, interval: Duration) {
    log::info!("Maintenance loop started (every {}s)", interval.as_secs());
    let step = Duration::from_millis(100);

    'outer: loop {
        let mut waited = Duration::ZERO;
        while waited < interval {
            if stop.load(Ordering::Acquire) {
                break 'outer;
            }
            let nap = step.min(interval - waited);
            thread::sleep(nap);
            waited += nap;
        }
        run_maintenance(pipeline);
    }
    log::info!("Maintenance loop stopped");
}

/// One maintenance pass: arbiter sweep, then vault retention
pub fn run_maintenance(pipeline: &Pipeline) {
    let report = pipeline.arbiter.sweep(Instant::now());
    pipeline.record_transitions(&report.transitions);
    for t in &report.transitions {
        if t.to == ProcessState::Contained {
            pipeline.sink.contain_process(t.pid);
        }
    }
    pipeline.capture(&report.captures);
    if !report.evicted.is_empty() {
        log::debug!("Evicted {} process profiles", report.evicted.len());
    }

    for result in pipeline.vault.purge_expired(Utc::now()) {
        match result {
            Ok(entry) => pipeline.telemetry.record(SecurityEvent::vault_purge(&entry)),
            Err(e) => {
                log::error!("Retention purge failed: {}", e);
                pipeline
                    .telemetry
                    .record(SecurityEvent::vault_failure("purge", "retention", &e.to_string()));
            }
        }
    }
}
