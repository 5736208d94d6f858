//! Vault Manager
//!
//! Copies suspicious artifacts into an isolated store (never moves them, the
//! process may still hold a handle), restores them on request and purges
//! them after retention. Every state change is journaled before it is
//! visible; the in-memory table is rebuilt from the journal on open.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::journal::{self, Journal, JournalRecord, JOURNAL_FILE};
use super::types::*;

const STORE_FOLDER: &str = "store";
const STORE_EXT: &str = "vault";

pub struct VaultManager {
    store_dir: PathBuf,
    journal: Mutex<Journal>,
    entries: RwLock<HashMap<Uuid, VaultEntry>>,
    /// Bytes held (or reserved) in the store
    usage: Mutex<u64>,
    limit_bytes: u64,
    retention: chrono::Duration,
    /// Serializes restore/purge so an entry changes state once at a time
    ops: Mutex<()>,
}

impl VaultManager {
    pub fn open(config: &VaultConfig, data_dir: &Path) -> Result<Self, VaultError> {
        let dir = config.dir.clone().unwrap_or_else(|| data_dir.join("vault"));
        let store_dir = dir.join(STORE_FOLDER);
        fs::create_dir_all(&store_dir).map_err(|e| VaultError::io("open", &store_dir, e))?;

        let journal_path = dir.join(JOURNAL_FILE);
        let (records, _) =
            journal::replay(&journal_path).map_err(|e| VaultError::io("replay", &journal_path, e))?;

        let entries = rebuild(records);
        let usage = entries
            .values()
            .filter(|e| e.state() != VaultState::Purged)
            .map(|e| e.size)
            .sum();

        let journal =
            Journal::open(&journal_path).map_err(|e| VaultError::io("open", &journal_path, e))?;

        let manager = Self {
            store_dir,
            journal: Mutex::new(journal),
            entries: RwLock::new(entries),
            usage: Mutex::new(usage),
            limit_bytes: config.max_store_mb.saturating_mul(1024 * 1024),
            retention: chrono::Duration::seconds(config.retention_secs.min(i64::MAX as u64) as i64),
            ops: Mutex::new(()),
        };
        manager.remove_orphans();

        log::info!(
            "Vault opened at {} ({} entries, {} bytes)",
            dir.display(),
            manager.entries.read().len(),
            usage
        );
        Ok(manager)
    }

    // ========================================================================
    // CAPTURE
    // ========================================================================

    /// Operator-initiated quarantine copy
    pub fn quarantine(&self, path: &Path, pid: u32) -> Result<VaultEntry, VaultError> {
        self.capture(path, pid, CaptureReason::Operator)
    }

    /// Copy `path` into the store. Each call yields a new entry, even for a
    /// path already in the vault.
    pub fn capture(&self, path: &Path, pid: u32, reason: CaptureReason) -> Result<VaultEntry, VaultError> {
        let metadata = fs::metadata(path).map_err(|e| VaultError::io("capture", path, e))?;
        if !metadata.is_file() {
            return Err(VaultError::io(
                "capture",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let expected = metadata.len();
        self.reserve(expected)?;

        let id = Uuid::new_v4();
        let store_path = self.store_dir.join(format!("{}.{}", id, STORE_EXT));

        let (sha256, size) = match copy_hashed(path, &store_path) {
            Ok(r) => r,
            Err(e) => {
                let _ = fs::remove_file(&store_path);
                self.release(expected);
                return Err(VaultError::io("capture", path, e));
            }
        };
        // The file may have changed size while being copied
        self.adjust(expected, size);

        let captured_at = Utc::now();
        let entry = VaultEntry {
            id,
            original_path: path.to_path_buf(),
            store_path: store_path.clone(),
            sha256,
            size,
            captured_at,
            pid,
            reason,
            history: vec![VaultTransition {
                state: VaultState::Quarantined,
                at: captured_at,
                note: Some(reason.as_str().to_string()),
            }],
        };

        {
            let mut journal = self.journal.lock();
            if let Err(e) = journal.append(&JournalRecord::Captured { entry: entry.clone() }) {
                let _ = fs::remove_file(&store_path);
                self.release(size);
                return Err(VaultError::io("journal", journal.path(), e));
            }
        }

        self.entries.write().insert(id, entry.clone());

        log::info!(
            "Captured {} -> {} ({}, pid {})",
            path.display(),
            store_path.display(),
            reason.as_str(),
            pid
        );
        Ok(entry)
    }

    // ========================================================================
    // RESTORE
    // ========================================================================

    /// Copy stored content back to its original path.
    ///
    /// All-or-nothing: the content is staged next to the target and renamed
    /// into place; if the transition cannot be journaled the previous file
    /// is put back.
    pub fn restore(
        &self,
        id: &Uuid,
        owners: &dyn PathOwnership,
        mode: RestoreMode,
    ) -> Result<VaultEntry, VaultError> {
        let _op = self.ops.lock();
        let entry = self.get(id).ok_or(VaultError::NotFound(*id))?;
        check_transition(&entry, VaultState::Restored)?;

        let target = entry.original_path.clone();
        if let Some(owner) = owners.owner_of(&target, entry.pid) {
            return Err(VaultError::PathInUse { path: target, pid: owner });
        }

        let stored = hash_file(&entry.store_path).map_err(|e| VaultError::io("restore", &entry.store_path, e))?;
        if stored != entry.sha256 {
            return Err(VaultError::HashMismatch {
                path: entry.store_path.clone(),
                expected: entry.sha256.clone(),
                actual: stored,
            });
        }

        let target_exists = target.exists();
        if mode == RestoreMode::Strict && target_exists {
            let current = hash_file(&target).map_err(|e| VaultError::io("restore", &target, e))?;
            if current != entry.sha256 {
                return Err(VaultError::HashMismatch {
                    path: target,
                    expected: entry.sha256.clone(),
                    actual: current,
                });
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io("restore", parent, e))?;
        }

        let staged = sibling(&target, &format!(".{}.cura-restore", id));
        let backup = sibling(&target, &format!(".{}.cura-prev", id));

        match copy_hashed(&entry.store_path, &staged) {
            Ok((hash, _)) if hash == entry.sha256 => {}
            Ok((hash, _)) => {
                let _ = fs::remove_file(&staged);
                return Err(VaultError::HashMismatch {
                    path: entry.store_path.clone(),
                    expected: entry.sha256.clone(),
                    actual: hash,
                });
            }
            Err(e) => {
                let _ = fs::remove_file(&staged);
                return Err(VaultError::io("restore", &staged, e));
            }
        }

        if target_exists {
            if let Err(e) = fs::rename(&target, &backup) {
                let _ = fs::remove_file(&staged);
                return Err(VaultError::io("restore", &target, e));
            }
        }

        if let Err(e) = fs::rename(&staged, &target) {
            let _ = fs::remove_file(&staged);
            if target_exists {
                let _ = fs::rename(&backup, &target);
            }
            return Err(VaultError::io("restore", &target, e));
        }

        let transition = VaultTransition {
            state: VaultState::Restored,
            at: Utc::now(),
            note: Some(format!("{:?}", mode).to_lowercase()),
        };

        if let Err(e) = self.append_transition(id, &transition) {
            // Undo: put back whatever was there before
            if target_exists {
                let _ = fs::rename(&backup, &target);
            } else {
                let _ = fs::remove_file(&target);
            }
            return Err(e);
        }

        if target_exists {
            let _ = fs::remove_file(&backup);
        }

        let updated = self.push_transition(id, transition).ok_or(VaultError::NotFound(*id))?;
        log::info!("Restored {} ({})", target.display(), id);
        Ok(updated)
    }

    // ========================================================================
    // PURGE
    // ========================================================================

    /// Destroy stored content. The `Purged` transition is journaled first;
    /// if shredding then fails the leftover file is removed as an orphan on
    /// the next open.
    pub fn purge(&self, id: &Uuid) -> Result<VaultEntry, VaultError> {
        let _op = self.ops.lock();
        let entry = self.get(id).ok_or(VaultError::NotFound(*id))?;
        check_transition(&entry, VaultState::Purged)?;

        let transition = VaultTransition {
            state: VaultState::Purged,
            at: Utc::now(),
            note: None,
        };
        self.append_transition(id, &transition)?;
        let updated = self.push_transition(id, transition).ok_or(VaultError::NotFound(*id))?;
        self.release(entry.size);

        shred(&entry.store_path, entry.size)
            .map_err(|e| VaultError::io("purge", &entry.store_path, e))?;

        log::info!("Purged {} ({})", entry.original_path.display(), id);
        Ok(updated)
    }

    /// Purge every live entry captured before `now - retention`
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<Result<VaultEntry, VaultError>> {
        let cutoff = now - self.retention;
        let expired: Vec<Uuid> = self
            .entries
            .read()
            .values()
            .filter(|e| e.state() != VaultState::Purged && e.captured_at <= cutoff)
            .map(|e| e.id)
            .collect();

        expired.iter().map(|id| self.purge(id)).collect()
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get(&self, id: &Uuid) -> Option<VaultEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Newest first
    pub fn list(&self) -> Vec<VaultEntry> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        entries
    }

    pub fn entries_for_pid(&self, pid: u32) -> Vec<VaultEntry> {
        self.list().into_iter().filter(|e| e.pid == pid).collect()
    }

    pub fn stats(&self) -> VaultStats {
        let entries = self.entries.read();
        let count = |s: VaultState| entries.values().filter(|e| e.state() == s).count();

        VaultStats {
            total_entries: entries.len(),
            quarantined: count(VaultState::Quarantined),
            restored: count(VaultState::Restored),
            purged: count(VaultState::Purged),
            store_bytes: *self.usage.lock(),
            limit_bytes: self.limit_bytes,
            oldest_entry: entries.values().map(|e| e.captured_at).min(),
            newest_entry: entries.values().map(|e| e.captured_at).max(),
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn reserve(&self, bytes: u64) -> Result<(), VaultError> {
        let mut usage = self.usage.lock();
        let available = self.limit_bytes.saturating_sub(*usage);
        if bytes > available {
            return Err(VaultError::CapacityExceeded { needed: bytes, available });
        }
        *usage += bytes;
        Ok(())
    }

    fn release(&self, bytes: u64) {
        let mut usage = self.usage.lock();
        *usage = usage.saturating_sub(bytes);
    }

    fn adjust(&self, reserved: u64, actual: u64) {
        let mut usage = self.usage.lock();
        *usage = usage.saturating_sub(reserved) + actual;
    }

    fn append_transition(&self, id: &Uuid, transition: &VaultTransition) -> Result<(), VaultError> {
        let mut journal = self.journal.lock();
        journal
            .append(&JournalRecord::Transition {
                id: *id,
                transition: transition.clone(),
            })
            .map_err(|e| VaultError::io("journal", journal.path(), e))
    }

    fn push_transition(&self, id: &Uuid, transition: VaultTransition) -> Option<VaultEntry> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id)?;
        entry.history.push(transition);
        Some(entry.clone())
    }

    /// Store files with no live entry (interrupted capture or shred)
    fn remove_orphans(&self) {
        let live: std::collections::HashSet<PathBuf> = self
            .entries
            .read()
            .values()
            .filter(|e| e.state() != VaultState::Purged)
            .map(|e| e.store_path.clone())
            .collect();

        let Ok(dir) = fs::read_dir(&self.store_dir) else {
            return;
        };
        for path in dir.flatten().map(|e| e.path()) {
            if path.is_file() && !live.contains(&path) {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                match shred(&path, size) {
                    Ok(()) => log::warn!("Removed orphaned vault file {}", path.display()),
                    Err(e) => log::error!("Failed to remove orphan {}: {}", path.display(), e),
                }
            }
        }
    }
}

// ============================================================================
// JOURNAL REPLAY
// ============================================================================

fn rebuild(records: Vec<JournalRecord>) -> HashMap<Uuid, VaultEntry> {
    let mut entries = HashMap::new();

    for record in records {
        match record {
            JournalRecord::Captured { entry } => {
                entries.insert(entry.id, entry);
            }
            JournalRecord::Transition { id, transition } => match entries.get_mut(&id) {
                Some(entry) if entry.state().can_transition_to(transition.state) => {
                    entry.history.push(transition);
                }
                Some(entry) => log::warn!(
                    "Journal: ignoring {} -> {} for {}",
                    entry.state(),
                    transition.state,
                    id
                ),
                None => log::warn!("Journal: transition for unknown entry {}", id),
            },
        }
    }
    entries
}

fn check_transition(entry: &VaultEntry, to: VaultState) -> Result<(), VaultError> {
    let from = entry.state();
    if !from.can_transition_to(to) {
        return Err(VaultError::InvalidTransition { id: entry.id, from, to });
    }
    Ok(())
}

// ============================================================================
// FILE UTILITIES
// ============================================================================

fn sibling(target: &Path, name: &str) -> PathBuf {
    match target.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Streaming copy to a new file; returns (hex SHA-256, bytes copied)
fn copy_hashed(src: &Path, dst: &Path) -> std::io::Result<(String, u64)> {
    let mut input = fs::File::open(src)?;
    let mut output = fs::OpenOptions::new().write(true).create_new(true).open(dst)?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;

    loop {
        let n = input.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        output.write_all(&buffer[..n])?;
        total += n as u64;
    }
    output.sync_all()?;

    Ok((hex::encode(hasher.finalize()), total))
}

pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Overwrite with zeros, then unlink. Missing file is not an error.
fn shred(path: &Path, size: u64) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    {
        let mut file = fs::OpenOptions::new().write(true).open(path)?;
        let zeros = [0u8; 4096];
        let mut remaining = size;
        while remaining > 0 {
            let n = remaining.min(zeros.len() as u64) as usize;
            file.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    fs::remove_file(path)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Owned(u32);

    impl PathOwnership for Owned {
        fn owner_of(&self, _path: &Path, capturing_pid: u32) -> Option<u32> {
            (self.0 != capturing_pid).then_some(self.0)
        }
    }

    fn setup() -> (TempDir, VaultManager) {
        let dir = TempDir::new().unwrap();
        let vault = VaultManager::open(&VaultConfig::default(), dir.path()).unwrap();
        (dir, vault)
    }

    fn file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_capture_copies_not_moves() {
        let (dir, vault) = setup();
        let path = file(&dir, "doc.txt", b"hello vault");

        let entry = vault.quarantine(&path, 42).unwrap();
        assert!(path.exists());
        assert!(entry.store_path.exists());
        assert_eq!(entry.state(), VaultState::Quarantined);
        assert_eq!(entry.sha256, hash_file(&path).unwrap());
        assert_eq!(entry.size, 11);
        assert_eq!(entry.pid, 42);
    }

    #[test]
    fn test_round_trip_restore() {
        let (dir, vault) = setup();
        let path = file(&dir, "notes.txt", b"original content");
        let original_hash = hash_file(&path).unwrap();

        let entry = vault.quarantine(&path, 7).unwrap();
        fs::remove_file(&path).unwrap();

        let restored = vault.restore(&entry.id, &NoOwnership, RestoreMode::Strict).unwrap();
        assert_eq!(restored.state(), VaultState::Restored);
        assert_eq!(restored.history.len(), 2);
        assert_eq!(hash_file(&path).unwrap(), original_hash);
    }

    #[test]
    fn test_modified_original_is_hash_mismatch() {
        let (dir, vault) = setup();
        let path = file(&dir, "notes.txt", b"original content");

        let entry = vault.quarantine(&path, 7).unwrap();
        fs::write(&path, b"encrypted garbage").unwrap();

        let err = vault.restore(&entry.id, &NoOwnership, RestoreMode::Strict).unwrap_err();
        assert!(matches!(err, VaultError::HashMismatch { .. }));
        // Nothing applied
        assert_eq!(fs::read(&path).unwrap(), b"encrypted garbage");
        assert_eq!(vault.get(&entry.id).unwrap().state(), VaultState::Quarantined);

        // Explicit overwrite rolls the tampering back
        vault.restore(&entry.id, &NoOwnership, RestoreMode::Overwrite).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"original content");
    }

    #[test]
    fn test_tampered_store_is_hash_mismatch() {
        let (dir, vault) = setup();
        let path = file(&dir, "a.bin", b"abc");
        let entry = vault.quarantine(&path, 1).unwrap();

        fs::write(&entry.store_path, b"xyz").unwrap();
        let err = vault.restore(&entry.id, &NoOwnership, RestoreMode::Overwrite).unwrap_err();
        assert!(matches!(err, VaultError::HashMismatch { .. }));
    }

    #[test]
    fn test_two_quarantines_distinct_entries() {
        let (dir, vault) = setup();
        let path = file(&dir, "same.txt", b"v1");

        let a = vault.quarantine(&path, 1).unwrap();
        fs::write(&path, b"v2").unwrap();
        let b = vault.quarantine(&path, 1).unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.store_path, b.store_path);
        assert_eq!(fs::read(&a.store_path).unwrap(), b"v1");
        assert_eq!(vault.list().len(), 2);
    }

    #[test]
    fn test_restore_refused_when_path_in_use() {
        let (dir, vault) = setup();
        let path = file(&dir, "shared.txt", b"data");
        let entry = vault.quarantine(&path, 10).unwrap();

        let err = vault.restore(&entry.id, &Owned(99), RestoreMode::Strict).unwrap_err();
        assert!(matches!(err, VaultError::PathInUse { pid: 99, .. }));

        // The capturing process itself does not block restore
        assert!(vault.restore(&entry.id, &Owned(10), RestoreMode::Strict).is_ok());
    }

    #[test]
    fn test_purge_and_invalid_transitions() {
        let (dir, vault) = setup();
        let path = file(&dir, "p.txt", b"purge me");
        let entry = vault.quarantine(&path, 3).unwrap();

        let purged = vault.purge(&entry.id).unwrap();
        assert_eq!(purged.state(), VaultState::Purged);
        assert!(!entry.store_path.exists());
        assert_eq!(vault.stats().store_bytes, 0);

        assert!(matches!(
            vault.restore(&entry.id, &NoOwnership, RestoreMode::Overwrite),
            Err(VaultError::InvalidTransition { from: VaultState::Purged, .. })
        ));
        assert!(matches!(vault.purge(&entry.id), Err(VaultError::InvalidTransition { .. })));
        assert!(matches!(vault.purge(&Uuid::new_v4()), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "keep.txt", b"persist");

        let (a, b) = {
            let vault = VaultManager::open(&VaultConfig::default(), dir.path()).unwrap();
            let a = vault.quarantine(&path, 5).unwrap();
            let b = vault.quarantine(&path, 5).unwrap();
            fs::remove_file(&path).unwrap();
            vault.restore(&a.id, &NoOwnership, RestoreMode::Strict).unwrap();
            vault.purge(&b.id).unwrap();
            (a, b)
        };

        let vault = VaultManager::open(&VaultConfig::default(), dir.path()).unwrap();
        let a2 = vault.get(&a.id).unwrap();
        assert_eq!(a2.state(), VaultState::Restored);
        assert_eq!(a2.history.len(), 2);
        assert_eq!(vault.get(&b.id).unwrap().state(), VaultState::Purged);
        assert_eq!(vault.stats().store_bytes, 7);
    }

    #[test]
    fn test_capture_after_crash_mid_append_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = file(&dir, "evidence.bin", b"payload");

        let a = {
            let vault = VaultManager::open(&VaultConfig::default(), dir.path()).unwrap();
            vault.quarantine(&path, 3).unwrap()
        };

        // Crash while writing the next record
        let journal_path = dir.path().join("vault").join(JOURNAL_FILE);
        let mut torn = fs::OpenOptions::new().append(true).open(&journal_path).unwrap();
        torn.write_all(b"deadbeef {\"op\":\"Transi").unwrap();
        drop(torn);

        let b = {
            let vault = VaultManager::open(&VaultConfig::default(), dir.path()).unwrap();
            vault.quarantine(&path, 3).unwrap()
        };

        let vault = VaultManager::open(&VaultConfig::default(), dir.path()).unwrap();
        assert_eq!(vault.list().len(), 2);
        assert!(vault.get(&a.id).is_some());
        assert_eq!(vault.get(&b.id).unwrap().state(), VaultState::Quarantined);
        assert!(b.store_path.exists());
    }

    #[test]
    fn test_capacity_limit() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig {
            max_store_mb: 1,
            ..Default::default()
        };
        let vault = VaultManager::open(&config, dir.path()).unwrap();
        let big = file(&dir, "big.bin", &vec![7u8; 700 * 1024]);

        vault.quarantine(&big, 1).unwrap();
        assert!(matches!(
            vault.quarantine(&big, 1),
            Err(VaultError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_huge_store_limit_saturates() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig {
            max_store_mb: u64::MAX,
            ..Default::default()
        };
        let vault = VaultManager::open(&config, dir.path()).unwrap();
        assert_eq!(vault.stats().limit_bytes, u64::MAX);

        let path = file(&dir, "small.txt", b"abc");
        assert!(vault.quarantine(&path, 1).is_ok());
    }

    #[test]
    fn test_retention_sweep() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig {
            retention_secs: 60,
            ..Default::default()
        };
        let vault = VaultManager::open(&config, dir.path()).unwrap();
        let path = file(&dir, "old.txt", b"old");
        let entry = vault.quarantine(&path, 1).unwrap();

        assert!(vault.purge_expired(Utc::now()).is_empty());
        let results = vault.purge_expired(Utc::now() + chrono::Duration::seconds(61));
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(vault.get(&entry.id).unwrap().state(), VaultState::Purged);
    }

    #[test]
    fn test_missing_source_is_io_failure() {
        let (dir, vault) = setup();
        let err = vault.quarantine(&dir.path().join("nope"), 1).unwrap_err();
        assert!(matches!(err, VaultError::IoFailure { op: "capture", .. }));
        assert_eq!(vault.stats().store_bytes, 0);
    }
}
