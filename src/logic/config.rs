//! Agent Configuration
//!
//! One JSON document with a section per engine. Missing fields take their
//! defaults; `CURA_*` environment variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;
use crate::logic::arbiter::ArbiterPolicy;
use crate::logic::features::ExtractorConfig;
use crate::logic::model::{GearPolicy, InferenceConfig, SchedulerConfig};
use crate::logic::telemetry::TelemetryConfig;
use crate::logic::vault::VaultConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: constants::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub workers: usize,
    /// Bounded wait for in-flight verdicts at shutdown
    pub shutdown_timeout_ms: u64,
    pub maintenance_interval_secs: u64,
    /// Re-submissions allowed after stale inference results
    pub max_resubmits: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: constants::DEFAULT_WORKERS,
            shutdown_timeout_ms: 5_000,
            maintenance_interval_secs: 10,
            max_resubmits: 3,
        }
    }
}

impl ServiceConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

// ============================================================================
// AGENT CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub queue: QueueConfig,
    pub service: ServiceConfig,
    pub scheduler: SchedulerConfig,
    pub inference: InferenceConfig,
    pub extractor: ExtractorConfig,
    pub policy: ArbiterPolicy,
    pub vault: VaultConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::default_data_dir(),
            queue: QueueConfig::default(),
            service: ServiceConfig::default(),
            scheduler: SchedulerConfig::default(),
            inference: InferenceConfig::default(),
            extractor: ExtractorConfig::default(),
            policy: ArbiterPolicy::default(),
            vault: VaultConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// File (if given) + environment overrides, validated
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if std::env::var_os("CURA_DATA_DIR").is_some() {
            self.data_dir = constants::get_data_dir();
        }
        if let Some(workers) = constants::get_workers() {
            self.service.workers = workers;
        }
        if let Some(capacity) = constants::get_queue_capacity() {
            self.queue.capacity = capacity;
        }
        if let Some(model) = constants::get_model_path() {
            self.inference.model_path = Some(model);
        }
        if let Some(gear) = constants::get_gear_policy() {
            self.scheduler.policy = gear.parse::<GearPolicy>().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be > 0".to_string()));
        }
        if self.service.workers == 0 {
            return Err(ConfigError::Invalid("service.workers must be > 0".to_string()));
        }
        if self.scheduler.low_water >= self.scheduler.high_water {
            return Err(ConfigError::Invalid(
                "scheduler.low_water must be below scheduler.high_water".to_string(),
            ));
        }
        if self.scheduler.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.sample_interval_ms must be > 0".to_string()));
        }
        if self.service.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "service.maintenance_interval_secs must be > 0".to_string(),
            ));
        }
        if self.vault.max_store_mb == 0 {
            return Err(ConfigError::Invalid("vault.max_store_mb must be > 0".to_string()));
        }
        if self.telemetry.enabled && self.telemetry.max_file_size_mb == 0 {
            return Err(ConfigError::Invalid("telemetry.max_file_size_mb must be > 0".to_string()));
        }
        self.policy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
