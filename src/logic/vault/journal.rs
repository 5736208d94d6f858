//! Vault Journal
//!
//! Append-only record of captures and state transitions. Each line is
//! `<crc32 hex> <json>`; the CRC covers the JSON text. A torn or corrupt
//! line is skipped on replay and counted. A torn tail left by a crash is
//! cut off on open so the next record starts on its own line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{VaultEntry, VaultTransition};

pub const JOURNAL_FILE: &str = "vault_journal.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum JournalRecord {
    Captured { entry: VaultEntry },
    Transition { id: Uuid, transition: VaultTransition },
}

pub struct Journal {
    file: File,
    path: PathBuf,
}

impl Journal {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        truncate_torn_tail(&mut file, path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durable once this returns
    pub fn append(&mut self, record: &JournalRecord) -> std::io::Result<()> {
        let line = encode_line(record)?;
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()
    }
}

/// Drop everything after the last newline. Appends always land at the end,
/// so the cut must happen before the first one.
fn truncate_torn_tail(file: &mut File, path: &Path) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut content)?;
    let keep = content.iter().rposition(|&b| b == b'\n').map_or(0, |i| i as u64 + 1);

    file.set_len(keep)?;
    file.sync_data()?;
    log::warn!(
        "Vault journal {}: cut {} byte(s) of torn record",
        path.display(),
        len - keep
    );
    Ok(())
}

pub fn encode_line(record: &JournalRecord) -> std::io::Result<String> {
    let json = serde_json::to_string(record)?;
    Ok(format!("{:08x} {}\n", crc32fast::hash(json.as_bytes()), json))
}

fn decode_line(line: &str) -> Option<JournalRecord> {
    let (crc, json) = line.split_once(' ')?;
    let crc = u32::from_str_radix(crc, 16).ok()?;
    if crc32fast::hash(json.as_bytes()) != crc {
        return None;
    }
    serde_json::from_str(json).ok()
}

/// Records in write order, plus the number of lines skipped
pub fn replay(path: &Path) -> std::io::Result<(Vec<JournalRecord>, usize)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };

    let mut records = Vec::new();
    let mut skipped = 0;

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(&line) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Vault journal {}: skipped {} corrupt line(s)", path.display(), skipped);
    }
    Ok((records, skipped))
}
