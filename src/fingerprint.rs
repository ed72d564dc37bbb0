//! Content fingerprints: SHA-256 over the full byte stream of a file.
//!
//! The fingerprint is the change-detection key of the whole crate. Two files
//! with identical bytes always produce the same fingerprint; any byte
//! difference produces a different one with overwhelming probability. File
//! metadata (mtime, size, name) is deliberately not mixed in, so a file that is
//! copied or moved keeps its fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size. Not semantically significant.
const CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 digest of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed hex digest (e.g. one read back from the store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// Hash an in-memory buffer.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of the file at `path`.
///
/// Reads in fixed-size chunks so multi-gigabyte scans never sit in memory.
/// A read failure is returned as-is: callers must treat it as "freshness
/// unknown" and convert the file rather than skip it.
pub fn fingerprint(path: &Path) -> io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}
