//! Security Event Recorder
//!
//! Append-only JSONL writer with size-based rotation. Owned by the service
//! and shared through the cloneable `Telemetry` handle.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::event::{get_session_id, SecurityEvent};

const LOG_EXT: &str = ".jsonl";

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Defaults to `<data_dir>/security_logs`
    pub dir: Option<PathBuf>,
    pub max_file_size_mb: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_file_size_mb: 50,
        }
    }
}

// ============================================================================
// RECORDER
// ============================================================================

pub struct Recorder {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
    max_file_size: u64,
    base_dir: PathBuf,
    sequence: u32,
}

impl Recorder {
    pub fn new(base_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        let (file_path, file) = Self::open_new_file(&base_dir, 0)?;

        Ok(Self {
            writer: BufWriter::new(file),
            current_file: file_path,
            current_size: 0,
            max_file_size: max_file_size.max(1),
            base_dir,
            sequence: 0,
        })
    }

    fn open_new_file(base_dir: &Path, sequence: u32) -> std::io::Result<(PathBuf, File)> {
        let now = Utc::now();
        // Rotations within the same second get a suffix
        let suffix = if sequence == 0 { String::new() } else { format!("_{}", sequence) };
        let filename = format!(
            "security_{}_{:02}_{:02}_{:02}{:02}{:02}{}{}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            suffix,
            LOG_EXT
        );
        let file_path = base_dir.join(&filename);

        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;

        log::info!("Opened security log: {:?}", file_path);
        Ok((file_path, file))
    }

    pub fn record(&mut self, event: &SecurityEvent) -> std::io::Result<()> {
        let line = event.to_jsonl();
        let bytes = line.as_bytes();

        if self.current_size > 0 && self.current_size + bytes.len() as u64 + 1 > self.max_file_size {
            self.rotate()?;
        }

        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\n")?;
        self.current_size += bytes.len() as u64 + 1;

        self.writer.flush()
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;

        self.sequence += 1;
        let (new_path, new_file) = Self::open_new_file(&self.base_dir, self.sequence)?;
        self.writer = BufWriter::new(new_file);

        log::info!("Rotated from {:?} to {:?}", self.current_file, new_path);
        self.current_file = new_path;
        self.current_size = 0;

        Ok(())
    }

    pub fn current_file(&self) -> &Path {
        &self.current_file
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ============================================================================
// SHARED HANDLE
// ============================================================================

/// Cloneable handle to the recorder. A disabled handle only logs.
#[derive(Clone)]
pub struct Telemetry {
    recorder: Option<Arc<Mutex<Recorder>>>,
    recorded: Arc<AtomicU64>,
}

impl Telemetry {
    pub fn open(config: &TelemetryConfig, data_dir: &Path) -> std::io::Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let dir = config
            .dir
            .clone()
            .unwrap_or_else(|| data_dir.join("security_logs"));
        let recorder = Recorder::new(dir, config.max_file_size_mb * 1024 * 1024)?;

        Ok(Self {
            recorder: Some(Arc::new(Mutex::new(recorder))),
            recorded: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn disabled() -> Self {
        Self {
            recorder: None,
            recorded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn record(&self, event: SecurityEvent) {
        match &self.recorder {
            Some(recorder) => {
                if let Err(e) = recorder.lock().record(&event) {
                    log::error!("Failed to record security event: {}", e);
                    return;
                }
                self.recorded.fetch_add(1, Ordering::Relaxed);
            }
            None => log::trace!("telemetry disabled, dropped: {}", event.description),
        }
    }

    pub fn events_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn current_log_file(&self) -> Option<PathBuf> {
        self.recorder
            .as_ref()
            .map(|r| r.lock().current_file().to_path_buf())
    }

    /// Record the stop event and flush
    pub fn shutdown(&self, uptime_secs: u64) {
        self.record(SecurityEvent::system_stop(uptime_secs));
        if let Some(recorder) = &self.recorder {
            let _ = recorder.lock().flush();
            log::info!("Security recorder shutdown. Total events: {}", self.events_recorded());
        }
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            events_recorded: self.events_recorded(),
            current_file: self
                .current_log_file()
                .map(|p| p.to_string_lossy().to_string()),
            session_id: get_session_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderStats {
    pub events_recorded: u64,
    pub current_file: Option<String>,
    pub session_id: String,
}

// ============================================================================
// QUERY API
// ============================================================================

/// Read all events from a log file; unparseable lines are skipped
pub fn read_events(file_path: &Path) -> std::io::Result<Vec<SecurityEvent>> {
    let reader = BufReader::new(File::open(file_path)?);
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<SecurityEvent>(&line) {
            events.push(event);
        }
    }

    Ok(events)
}

pub fn count_events_by_type(file_path: &Path) -> std::io::Result<HashMap<String, u64>> {
    let mut counts = HashMap::new();
    for event in read_events(file_path)? {
        *counts.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Log files in `dir`, oldest first
pub fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "jsonl") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::telemetry::EventType;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(dir.path().to_path_buf(), 1024 * 1024).unwrap();

        recorder
            .record(&SecurityEvent::new(EventType::SystemStart, "start"))
            .unwrap();

        let events = read_events(recorder.current_file()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SystemStart);
    }

    #[test]
    fn test_rotation() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(dir.path().to_path_buf(), 200).unwrap();
        let first = recorder.current_file().to_path_buf();

        for i in 0..5 {
            recorder
                .record(&SecurityEvent::new(EventType::VerdictIssued, &format!("verdict {}", i)))
                .unwrap();
        }

        assert_ne!(recorder.current_file(), first.as_path());
        let files = list_log_files(dir.path()).unwrap();
        assert!(files.len() > 1);

        let total: usize = files.iter().map(|f| read_events(f).unwrap().len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_handle_counts_and_disabled() {
        let dir = TempDir::new().unwrap();
        let telemetry = Telemetry::open(&TelemetryConfig::default(), dir.path()).unwrap();
        telemetry.record(SecurityEvent::new(EventType::BackendSwitch, "switch"));
        telemetry.record(SecurityEvent::new(EventType::VaultPurge, "purge"));
        assert_eq!(telemetry.events_recorded(), 2);

        let file = telemetry.current_log_file().unwrap();
        assert!(file.starts_with(dir.path().join("security_logs")));
        let counts = count_events_by_type(&file).unwrap();
        assert_eq!(counts.get("vault_purge"), Some(&1));

        let off = Telemetry::disabled();
        off.record(SecurityEvent::new(EventType::SystemStart, "x"));
        assert_eq!(off.events_recorded(), 0);
        assert!(off.current_log_file().is_none());
    }
}
