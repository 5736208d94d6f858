//! Kernel Event Types
//!
//! Immutable records produced by the kernel sensor. Fields are private and
//! only readable through accessors; an event is never mutated after creation.

use serde::{Deserialize, Serialize};

// ============================================================================
// BOUNDS
// ============================================================================

/// Maximum path length in UTF-16 units (MAX_PATH)
pub const MAX_PATH_UNITS: usize = 260;

/// Maximum opaque context size in bytes
pub const MAX_CONTEXT_BYTES: usize = 512;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("path exceeds {max} UTF-16 units ({len})")]
    PathTooLong { len: usize, max: usize },

    #[error("context exceeds {max} bytes ({len})")]
    ContextTooLarge { len: usize, max: usize },

    #[error("unknown event kind code {0}")]
    UnknownKind(u32),

    #[error("record too short: {len} bytes, expected {expected}")]
    Truncated { len: usize, expected: usize },

    #[error("path is not valid UTF-16")]
    InvalidPath,
}

// ============================================================================
// EVENT ID / KIND
// ============================================================================

/// Sensor-assigned message id. Verdicts are tagged with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt#{}", self.0)
    }
}

/// Closed set of operations the sensor reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    FileCreate,
    FileWrite,
    FileDelete,
    ProcessCreate,
    ProcessTerminate,
    NetworkConnect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FileCreate => "file_create",
            EventKind::FileWrite => "file_write",
            EventKind::FileDelete => "file_delete",
            EventKind::ProcessCreate => "process_create",
            EventKind::ProcessTerminate => "process_terminate",
            EventKind::NetworkConnect => "network_connect",
        }
    }

    /// Wire code used by the sensor
    pub fn code(&self) -> u32 {
        match self {
            EventKind::FileCreate => 0,
            EventKind::FileWrite => 1,
            EventKind::FileDelete => 2,
            EventKind::ProcessCreate => 3,
            EventKind::ProcessTerminate => 4,
            EventKind::NetworkConnect => 5,
        }
    }

    pub fn is_file_op(&self) -> bool {
        matches!(self, EventKind::FileCreate | EventKind::FileWrite | EventKind::FileDelete)
    }

    /// Whether the path field names a local artifact (file or process image)
    pub fn touches_artifact(&self) -> bool {
        self.is_file_op() || *self == EventKind::ProcessCreate
    }
}

impl TryFrom<u32> for EventKind {
    type Error = EventError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(EventKind::FileCreate),
            1 => Ok(EventKind::FileWrite),
            2 => Ok(EventKind::FileDelete),
            3 => Ok(EventKind::ProcessCreate),
            4 => Ok(EventKind::ProcessTerminate),
            5 => Ok(EventKind::NetworkConnect),
            other => Err(EventError::UnknownKind(other)),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// KERNEL EVENT
// ============================================================================

/// Serialized shape, validated into `KernelEvent`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawKernelEvent {
    id: u64,
    timestamp_us: u64,
    pid: u32,
    tid: u32,
    kind: EventKind,
    #[serde(default)]
    path: String,
    #[serde(default)]
    context: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawKernelEvent", into = "RawKernelEvent")]
pub struct KernelEvent {
    id: EventId,
    timestamp_us: u64,
    pid: u32,
    tid: u32,
    kind: EventKind,
    path: String,
    context: Vec<u8>,
}

impl KernelEvent {
    pub fn new(
        id: u64,
        timestamp_us: u64,
        pid: u32,
        tid: u32,
        kind: EventKind,
        path: impl Into<String>,
        context: Vec<u8>,
    ) -> Result<Self, EventError> {
        let path = path.into();
        let units = path.encode_utf16().count();
        if units > MAX_PATH_UNITS {
            return Err(EventError::PathTooLong { len: units, max: MAX_PATH_UNITS });
        }
        if context.len() > MAX_CONTEXT_BYTES {
            return Err(EventError::ContextTooLarge { len: context.len(), max: MAX_CONTEXT_BYTES });
        }

        Ok(Self {
            id: EventId(id),
            timestamp_us,
            pid,
            tid,
            kind,
            path,
            context,
        })
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// Monotonic sensor timestamp (microseconds)
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn context(&self) -> &[u8] {
        &self.context
    }
}

impl TryFrom<RawKernelEvent> for KernelEvent {
    type Error = EventError;

    fn try_from(raw: RawKernelEvent) -> Result<Self, Self::Error> {
        KernelEvent::new(raw.id, raw.timestamp_us, raw.pid, raw.tid, raw.kind, raw.path, raw.context)
    }
}

impl From<KernelEvent> for RawKernelEvent {
    fn from(event: KernelEvent) -> Self {
        Self {
            id: event.id.0,
            timestamp_us: event.timestamp_us,
            pid: event.pid,
            tid: event.tid,
            kind: event.kind,
            path: event.path,
            context: event.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_bound_counts_utf16_units() {
        let ok = "a".repeat(MAX_PATH_UNITS);
        assert!(KernelEvent::new(1, 0, 1, 1, EventKind::FileWrite, ok, vec![]).is_ok());

        let long = "a".repeat(MAX_PATH_UNITS + 1);
        let err = KernelEvent::new(1, 0, 1, 1, EventKind::FileWrite, long, vec![]).unwrap_err();
        assert_eq!(err, EventError::PathTooLong { len: MAX_PATH_UNITS + 1, max: MAX_PATH_UNITS });
    }

    #[test]
    fn test_context_bound() {
        let err = KernelEvent::new(1, 0, 1, 1, EventKind::FileWrite, "C:\\a", vec![0; 513]).unwrap_err();
        assert!(matches!(err, EventError::ContextTooLarge { .. }));
    }

    #[test]
    fn test_json_rejects_oversized_path() {
        let json = format!(
            r#"{{"id":1,"timestamp_us":5,"pid":7,"tid":8,"kind":"FileWrite","path":"{}"}}"#,
            "x".repeat(300)
        );
        assert!(serde_json::from_str::<KernelEvent>(&json).is_err());
    }

    #[test]
    fn test_kind_codes() {
        for code in 0..6 {
            let kind = EventKind::try_from(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(EventKind::try_from(9), Err(EventError::UnknownKind(9)));
        assert!(EventKind::ProcessCreate.touches_artifact());
        assert!(!EventKind::NetworkConnect.touches_artifact());
    }
}
