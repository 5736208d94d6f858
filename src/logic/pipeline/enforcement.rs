//! Enforcement Sink - outbound boundary to the sensor
//!
//! Exactly one verdict per event is delivered here, in dequeue order per
//! process.

use std::io::Write;

use parking_lot::Mutex;

use crate::logic::threat::Verdict;

pub trait EnforcementSink: Send + Sync {
    fn deliver(&self, verdict: &Verdict);

    /// Process-wide containment request. Sensors that enforce per
    /// operation can rely on Block verdicts alone.
    fn contain_process(&self, _pid: u32) {}
}

/// Keeps every verdict in memory (tests, embedding)
#[derive(Default)]
pub struct CollectingSink {
    verdicts: Mutex<Vec<Verdict>>,
    contained: Mutex<Vec<u32>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts.lock().clone()
    }

    pub fn for_pid(&self, pid: u32) -> Vec<Verdict> {
        self.verdicts
            .lock()
            .iter()
            .filter(|v| v.pid == pid)
            .cloned()
            .collect()
    }

    pub fn contained(&self) -> Vec<u32> {
        self.contained.lock().clone()
    }
}

impl EnforcementSink for CollectingSink {
    fn deliver(&self, verdict: &Verdict) {
        self.verdicts.lock().push(verdict.clone());
    }

    fn contain_process(&self, pid: u32) {
        self.contained.lock().push(pid);
    }
}

/// One JSON verdict per line (stand-in for the privileged transport)
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl<W: Write + Send> EnforcementSink for JsonLinesSink<W> {
    fn deliver(&self, verdict: &Verdict) {
        let line = match serde_json::to_string(verdict) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode verdict for {}: {}", verdict.event_id, e);
                return;
            }
        };

        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            log::error!("Failed to deliver verdict for {}: {}", verdict.event_id, e);
        }
    }

    fn contain_process(&self, pid: u32) {
        let mut out = self.out.lock();
        let line = serde_json::json!({ "contain_pid": pid });
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            log::error!("Failed to deliver containment for pid {}: {}", pid, e);
        }
    }
}
