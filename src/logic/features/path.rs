//! Path Signals
//!
//! String-level analysis of event paths. Paths are compared in a normalized
//! form: lowercase, `/` separators (sensor paths are Windows style).

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// CONSTANTS
// ============================================================================

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "scr", "com", "bat", "cmd", "ps1", "vbs", "vbe", "js", "jse",
    "wsf", "hta", "msi", "sys", "lnk",
];

const ENCRYPTED_EXTENSIONS: &[&str] = &[
    "locked", "encrypted", "crypt", "crypted", "enc", "locky", "wncry", "zzz", "cerber",
];

const RANSOM_NOTE_FRAGMENTS: &[&str] = &[
    "how_to_decrypt", "readme_decrypt", "restore_files", "decrypt_instructions", "your_files",
];

/// Name fragments that are never legitimate image names
pub const SUSPICIOUS_NAMES: &[&str] = &[
    "cryptolocker", "ransomware", "malware", "mimikatz", "keylogger",
];

const TEMP_SEGMENTS: &[&str] = &["temp", "tmp", "$recycle.bin"];

static DOUBLE_EXTENSION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\.(pdf|docx?|xlsx?|pptx?|jpe?g|png|txt|zip)\.[a-z0-9]{1,8}$").ok()
});

fn has_double_extension(name: &str) -> bool {
    DOUBLE_EXTENSION.as_ref().map_or(false, |re| re.is_match(name))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Lowercase, forward-slash form used for all matching
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Final path component of a normalized path
pub fn file_name(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

/// Extension of a file name, without the dot
pub fn extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Shannon entropy in bits per symbol (0.0 - 8.0)
pub fn shannon_entropy(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }

    let mut counts = [0u32; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }

    let len = bytes.len() as f32;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f32 / len;
            -p * p.log2()
        })
        .sum()
}

/// Entropy of a short name, normalized by the maximum achievable for its length
pub fn name_entropy(name: &str) -> f32 {
    let len = name.len();
    if len < 2 {
        return 0.0;
    }
    let max = (len.min(256) as f32).log2();
    (shannon_entropy(name.as_bytes()) / max).clamp(0.0, 1.0)
}

/// Extension risk in [0, 1]
pub fn extension_risk(name: &str) -> f32 {
    if RANSOM_NOTE_FRAGMENTS.iter().any(|f| name.contains(f)) {
        return 0.8;
    }

    let ext = match extension(name) {
        Some(ext) => ext,
        None => return 0.0,
    };

    if has_double_extension(name) && EXECUTABLE_EXTENSIONS.contains(&ext) {
        1.0
    } else if EXECUTABLE_EXTENSIONS.contains(&ext) {
        0.7
    } else if ENCRYPTED_EXTENSIONS.contains(&ext) {
        0.9
    } else if has_double_extension(name) {
        0.6
    } else {
        0.0
    }
}

pub fn is_suspicious_name(normalized: &str) -> bool {
    SUSPICIOUS_NAMES.iter().any(|n| normalized.contains(n))
}

pub fn is_temp_or_hidden(normalized: &str) -> bool {
    let hidden = file_name(normalized).starts_with('.');
    hidden || normalized.split('/').any(|seg| TEMP_SEGMENTS.contains(&seg))
}

/// Number of directory components
pub fn depth(normalized: &str) -> usize {
    normalized.split('/').filter(|s| !s.is_empty()).count().saturating_sub(1)
}
