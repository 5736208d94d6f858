//! Gear Scheduler - picks the backend from queue pressure
//!
//! Samples queue depth on an interval. Sustained depth above the high-water
//! mark shifts up to the high-power backend; depth at or below the low-water
//! mark for the cooldown period shifts back down. Depth in between resets
//! both timers.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::backend::BackendKind;
use super::gear::SwitchReport;
use super::inference::InferenceEngine;
use crate::logic::queue::EventQueue;
use crate::logic::telemetry::{SecurityEvent, Telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GearPolicy {
    Auto,
    ForceLowPower,
    ForceHighPower,
}

impl GearPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GearPolicy::Auto => "auto",
            GearPolicy::ForceLowPower => "eco",
            GearPolicy::ForceHighPower => "turbo",
        }
    }
}

impl FromStr for GearPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(GearPolicy::Auto),
            "eco" | "low" | "lowpower" | "forcelowpower" => Ok(GearPolicy::ForceLowPower),
            "turbo" | "high" | "highpower" | "forcehighpower" => Ok(GearPolicy::ForceHighPower),
            other => Err(format!("unknown gear policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub policy: GearPolicy,
    pub high_water: usize,
    pub low_water: usize,
    /// Depth must stay above high water this long before shifting up
    pub sustain_ms: u64,
    /// Depth must stay at or below low water this long before shifting down
    pub cooldown_secs: u64,
    pub sample_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: GearPolicy::Auto,
            high_water: 512,
            low_water: 64,
            sustain_ms: 2_000,
            cooldown_secs: 30,
            sample_interval_ms: 250,
        }
    }
}

#[derive(Default)]
struct Pressure {
    above_since: Option<Instant>,
    below_since: Option<Instant>,
}

pub struct GearScheduler {
    config: SchedulerConfig,
    policy: RwLock<GearPolicy>,
    pressure: Mutex<Pressure>,
}

impl GearScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            policy: RwLock::new(config.policy),
            config,
            pressure: Mutex::new(Pressure::default()),
        }
    }

    pub fn policy(&self) -> GearPolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: GearPolicy) {
        *self.policy.write() = policy;
        *self.pressure.lock() = Pressure::default();
        log::info!("Gear policy set to {}", policy.as_str());
    }

    /// Backend to switch to for this sample, if any
    pub fn decide(&self, depth: usize, current: BackendKind, now: Instant) -> Option<BackendKind> {
        let wanted = match self.policy() {
            GearPolicy::ForceLowPower => BackendKind::LowPower,
            GearPolicy::ForceHighPower => BackendKind::HighPower,
            GearPolicy::Auto => return self.decide_auto(depth, current, now),
        };
        (wanted != current).then_some(wanted)
    }

    fn decide_auto(&self, depth: usize, current: BackendKind, now: Instant) -> Option<BackendKind> {
        let mut p = self.pressure.lock();

        if depth > self.config.high_water {
            p.below_since = None;
            let since = *p.above_since.get_or_insert(now);
            if current == BackendKind::LowPower
                && now.duration_since(since) >= Duration::from_millis(self.config.sustain_ms)
            {
                return Some(BackendKind::HighPower);
            }
        } else if depth <= self.config.low_water {
            p.above_since = None;
            let since = *p.below_since.get_or_insert(now);
            if current == BackendKind::HighPower
                && now.duration_since(since) >= Duration::from_secs(self.config.cooldown_secs)
            {
                return Some(BackendKind::LowPower);
            }
        } else {
            *p = Pressure::default();
        }
        None
    }

    /// One sampling step: decide and, if needed, switch
    pub fn tick(&self, engine: &InferenceEngine, depth: usize, now: Instant) -> Option<SwitchReport> {
        engine.release_pending();
        let target = self.decide(depth, engine.current_backend(), now)?;
        let reason = match self.policy() {
            GearPolicy::Auto => format!("queue depth {}", depth),
            forced => format!("policy {}", forced.as_str()),
        };

        match engine.switch_to(target, &reason) {
            Ok(report) => {
                *self.pressure.lock() = Pressure::default();
                report
            }
            Err(e) => {
                log::error!("Backend switch to {} failed: {}", target, e);
                None
            }
        }
    }

    /// Background sampling thread; exits when `stop` is set
    pub fn spawn(
        self: Arc<Self>,
        engine: Arc<InferenceEngine>,
        queue: Arc<EventQueue>,
        telemetry: Telemetry,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let interval = Duration::from_millis(self.config.sample_interval_ms.max(1));

        thread::Builder::new()
            .name("cura-gear".to_string())
            .spawn(move || {
                log::info!("Gear scheduler started ({})", self.policy().as_str());
                while !stop.load(Ordering::Acquire) {
                    if let Some(report) = self.tick(&engine, queue.depth(), Instant::now()) {
                        telemetry.record(SecurityEvent::backend_switch(&report));
                    }
                    thread::sleep(interval);
                }
                log::info!("Gear scheduler stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> GearScheduler {
        GearScheduler::new(SchedulerConfig {
            high_water: 100,
            low_water: 10,
            sustain_ms: 1_000,
            cooldown_secs: 5,
            ..Default::default()
        })
    }

    #[test]
    fn test_shift_up_needs_sustained_pressure() {
        let s = scheduler();
        let t0 = Instant::now();

        assert_eq!(s.decide(500, BackendKind::LowPower, t0), None);
        assert_eq!(s.decide(500, BackendKind::LowPower, t0 + Duration::from_millis(500)), None);
        assert_eq!(
            s.decide(500, BackendKind::LowPower, t0 + Duration::from_millis(1_000)),
            Some(BackendKind::HighPower)
        );
    }

    #[test]
    fn test_mid_band_resets_timers() {
        let s = scheduler();
        let t0 = Instant::now();

        s.decide(500, BackendKind::LowPower, t0);
        s.decide(50, BackendKind::LowPower, t0 + Duration::from_millis(600));
        assert_eq!(s.decide(500, BackendKind::LowPower, t0 + Duration::from_millis(1_200)), None);
    }

    #[test]
    fn test_shift_down_after_cooldown() {
        let s = scheduler();
        let t0 = Instant::now();

        assert_eq!(s.decide(0, BackendKind::HighPower, t0), None);
        assert_eq!(s.decide(0, BackendKind::HighPower, t0 + Duration::from_secs(4)), None);
        assert_eq!(
            s.decide(0, BackendKind::HighPower, t0 + Duration::from_secs(5)),
            Some(BackendKind::LowPower)
        );
        // Already low: nothing to do
        assert_eq!(s.decide(0, BackendKind::LowPower, t0 + Duration::from_secs(9)), None);
    }

    #[test]
    fn test_forced_policy() {
        let s = scheduler();
        s.set_policy(GearPolicy::ForceHighPower);
        assert_eq!(s.decide(0, BackendKind::LowPower, Instant::now()), Some(BackendKind::HighPower));
        assert_eq!(s.decide(0, BackendKind::HighPower, Instant::now()), None);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("TURBO".parse::<GearPolicy>().unwrap(), GearPolicy::ForceHighPower);
        assert_eq!("eco".parse::<GearPolicy>().unwrap(), GearPolicy::ForceLowPower);
        assert_eq!("auto".parse::<GearPolicy>().unwrap(), GearPolicy::Auto);
        assert!("warp".parse::<GearPolicy>().is_err());
    }

    #[test]
    fn test_tick_switches_engine() {
        let engine = InferenceEngine::from_config(&Default::default());
        let s = scheduler();
        s.set_policy(GearPolicy::ForceHighPower);

        let report = s.tick(&engine, 0, Instant::now()).unwrap();
        assert_eq!(report.to, BackendKind::HighPower);
        assert_eq!(engine.generation(), 1);
        assert!(s.tick(&engine, 0, Instant::now()).is_none());
    }
}
