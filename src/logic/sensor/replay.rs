//! Replay Sources
//!
//! Stand-ins for the privileged sensor transport: JSONL event files and raw
//! fixed-layout record streams.

use std::io::{BufRead, Read};

use super::types::{EventError, KernelEvent};
use super::wire::RECORD_LEN;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("line {line}: {source}")]
    Json { line: usize, source: serde_json::Error },

    #[error("record {index}: {source}")]
    Record { index: usize, source: EventError },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One `KernelEvent` JSON object per line; blank lines and `#` comments skipped
pub struct JsonLinesSource<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0, buf: String::new() }
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<KernelEvent, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(ReplayError::Io(e))),
            }
            self.line += 1;

            let trimmed = self.buf.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            return Some(
                serde_json::from_str(trimmed)
                    .map_err(|source| ReplayError::Json { line: self.line, source }),
            );
        }
    }
}

/// Back-to-back fixed-layout records
pub struct RecordSource<R> {
    reader: R,
    index: usize,
}

impl<R: Read> RecordSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, index: 0 }
    }
}

impl<R: Read> Iterator for RecordSource<R> {
    type Item = Result<KernelEvent, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; RECORD_LEN];
        let mut filled = 0;

        while filled < RECORD_LEN {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(ReplayError::Io(e))),
            }
        }

        if filled == 0 {
            return None;
        }

        let index = self.index;
        self.index += 1;
        Some(
            KernelEvent::decode(&buf[..filled])
                .map_err(|source| ReplayError::Record { index, source }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::sensor::EventKind;

    #[test]
    fn test_json_lines_skips_comments() {
        let input = "# replay\n\
            {\"id\":1,\"timestamp_us\":10,\"pid\":4,\"tid\":4,\"kind\":\"ProcessCreate\",\"path\":\"C:\\\\a.exe\"}\n\
            \n\
            {\"id\":2,\"timestamp_us\":11,\"pid\":4,\"tid\":4,\"kind\":\"Bogus\"}\n";

        let items: Vec<_> = JsonLinesSource::new(input.as_bytes()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().kind(), EventKind::ProcessCreate);
        assert!(matches!(items[1], Err(ReplayError::Json { line: 4, .. })));
    }

    #[test]
    fn test_record_stream() {
        let a = KernelEvent::new(1, 1, 10, 11, EventKind::FileWrite, "C:\\a.txt", vec![9]).unwrap();
        let b = KernelEvent::new(2, 2, 10, 11, EventKind::FileDelete, "C:\\b.txt", vec![]).unwrap();
        let mut bytes = a.encode();
        bytes.extend(b.encode());
        bytes.extend_from_slice(&[0u8; 10]);

        let items: Vec<_> = RecordSource::new(bytes.as_slice()).collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &a);
        assert_eq!(items[1].as_ref().unwrap(), &b);
        assert!(matches!(items[2], Err(ReplayError::Record { index: 2, .. })));
    }
}
