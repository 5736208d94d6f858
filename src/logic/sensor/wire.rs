//! Fixed-layout sensor record
//!
//! Little-endian layout:
//! ```text
//! 0    u64  id
//! 8    u64  timestamp_us
//! 16   u32  pid
//! 20   u32  tid
//! 24   u32  kind
//! 28   u16  path_len     (UTF-16 units)
//! 30   u16  context_len  (bytes)
//! 32   [u16; 260] path
//! 552  [u8; 512]  context
//! ```

use super::types::{EventError, EventKind, KernelEvent, MAX_CONTEXT_BYTES, MAX_PATH_UNITS};

const HEADER_LEN: usize = 32;
const PATH_OFFSET: usize = HEADER_LEN;
const CONTEXT_OFFSET: usize = PATH_OFFSET + MAX_PATH_UNITS * 2;

/// Total size of one record on the wire
pub const RECORD_LEN: usize = CONTEXT_OFFSET + MAX_CONTEXT_BYTES;

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

impl KernelEvent {
    /// Decode one fixed-layout record
    pub fn decode(buf: &[u8]) -> Result<Self, EventError> {
        if buf.len() < RECORD_LEN {
            return Err(EventError::Truncated { len: buf.len(), expected: RECORD_LEN });
        }

        let id = read_u64(buf, 0);
        let timestamp_us = read_u64(buf, 8);
        let pid = read_u32(buf, 16);
        let tid = read_u32(buf, 20);
        let kind = EventKind::try_from(read_u32(buf, 24))?;
        let path_len = read_u16(buf, 28) as usize;
        let context_len = read_u16(buf, 30) as usize;

        if path_len > MAX_PATH_UNITS {
            return Err(EventError::PathTooLong { len: path_len, max: MAX_PATH_UNITS });
        }
        if context_len > MAX_CONTEXT_BYTES {
            return Err(EventError::ContextTooLarge { len: context_len, max: MAX_CONTEXT_BYTES });
        }

        let units: Vec<u16> = (0..path_len)
            .map(|i| read_u16(buf, PATH_OFFSET + i * 2))
            .collect();
        let path = String::from_utf16(&units).map_err(|_| EventError::InvalidPath)?;
        let context = buf[CONTEXT_OFFSET..CONTEXT_OFFSET + context_len].to_vec();

        KernelEvent::new(id, timestamp_us, pid, tid, kind, path, context)
    }

    /// Encode into the fixed layout (zero padded)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_LEN];
        let units: Vec<u16> = self.path().encode_utf16().collect();
        let context = self.context();

        buf[0..8].copy_from_slice(&self.id().0.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp_us().to_le_bytes());
        buf[16..20].copy_from_slice(&self.pid().to_le_bytes());
        buf[20..24].copy_from_slice(&self.tid().to_le_bytes());
        buf[24..28].copy_from_slice(&self.kind().code().to_le_bytes());
        buf[28..30].copy_from_slice(&(units.len() as u16).to_le_bytes());
        buf[30..32].copy_from_slice(&(context.len() as u16).to_le_bytes());

        for (i, unit) in units.iter().enumerate() {
            let at = PATH_OFFSET + i * 2;
            buf[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
        buf[CONTEXT_OFFSET..CONTEXT_OFFSET + context.len()].copy_from_slice(context);

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_len() {
        assert_eq!(RECORD_LEN, 1064);
    }

    #[test]
    fn test_decode_wide_path() {
        let event = KernelEvent::new(
            42,
            1_000,
            1234,
            5678,
            EventKind::FileWrite,
            "C:\\Users\\tést\\file_rahasia.txt",
            vec![1, 2, 3],
        )
        .unwrap();

        let decoded = KernelEvent::decode(&event.encode()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let err = KernelEvent::decode(&[0u8; 100]).unwrap_err();
        assert_eq!(err, EventError::Truncated { len: 100, expected: RECORD_LEN });
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        let event = KernelEvent::new(1, 1, 1, 1, EventKind::FileCreate, "C:\\x", vec![]).unwrap();

        let mut bad_kind = event.encode();
        bad_kind[24..28].copy_from_slice(&77u32.to_le_bytes());
        assert_eq!(KernelEvent::decode(&bad_kind), Err(EventError::UnknownKind(77)));

        let mut bad_len = event.encode();
        bad_len[28..30].copy_from_slice(&300u16.to_le_bytes());
        assert!(matches!(KernelEvent::decode(&bad_len), Err(EventError::PathTooLong { .. })));

        let mut bad_utf16 = event.encode();
        bad_utf16[PATH_OFFSET..PATH_OFFSET + 2].copy_from_slice(&0xD800u16.to_le_bytes());
        bad_utf16[28..30].copy_from_slice(&1u16.to_le_bytes());
        assert_eq!(KernelEvent::decode(&bad_utf16), Err(EventError::InvalidPath));
    }
}
