//! File fingerprints and content hashing.
//!
//! A [`FileFingerprint`] is the `(hash, size, mtime)` triple used for cache
//! invalidation. The fast path compares only `(size, mtime)`; the content
//! hash disambiguates when metadata matches but the bytes may differ.

use crate::filesystem::FileStat;
use md5::Digest;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

/// Hashes raw source bytes into the hex digest used as a snapshot signature.
///
/// The bytes are hashed as-is; platform line endings are part of the
/// identity.
pub fn content_hash(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = md5::Md5::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Identity of a file's on-disk state at analysis time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFingerprint {
    /// Content hash of the file bytes.
    pub hash: String,
    pub size_bytes: u64,
    pub mtime_ms: u64,
}

impl FileFingerprint {
    pub fn new(stat: &FileStat, hash: String) -> Self {
        Self { hash, size_bytes: stat.size_bytes, mtime_ms: stat.mtime_ms }
    }

    /// Fast-path comparison against a fresh stat, no rehash.
    pub fn matches_stat(&self, stat: &FileStat) -> bool {
        self.size_bytes == stat.size_bytes && self.mtime_ms == stat.mtime_ms
    }

    /// Full comparison, consulted when size/mtime agree but certainty is
    /// needed.
    pub fn matches_hash(&self, hash: &str) -> bool {
        self.hash == hash
    }
}

/// Session-owned memo of the last fingerprint observed per file.
#[derive(Debug, Default)]
pub struct FingerprintMemo {
    entries: HashMap<PathBuf, FileFingerprint>,
}

impl FingerprintMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&FileFingerprint> {
        self.entries.get(path)
    }

    pub fn record(&mut self, path: PathBuf, fingerprint: FileFingerprint) {
        self.entries.insert(path, fingerprint);
    }

    /// Drops any memoized fingerprint for `path`.
    pub fn invalidate(&mut self, path: &Path) {
        if self.entries.remove(path).is_some() {
            trace!("invalidated fingerprint for \"{}\"", path.display());
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
