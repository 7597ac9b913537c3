//! Snapshot caches.
//!
//! A [`SnapshotCache`] is the keyed store discovery consults before paying
//! for a read or an analysis. Two implementations ship: an in-memory map and
//! a disk-backed store with one JSON file per snapshot. Disk entries are
//! keyed by a hash of `(analyzer_id, evaluator_id, file_path)`, so bumping
//! either identifier orphans every previous entry.

use crate::{discovery::DiscoverySnapshot, error::Result, utils};
use md5::Digest;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Keyed store of discovery snapshots.
pub trait SnapshotCache: Send {
    /// Returns the snapshot for `path` only when its signature matches.
    fn load(&mut self, path: &Path, signature: &str) -> Option<Arc<DiscoverySnapshot>>;

    /// Returns the snapshot for `path` regardless of signature.
    fn peek(&self, path: &Path) -> Option<Arc<DiscoverySnapshot>>;

    fn store(&mut self, snapshot: Arc<DiscoverySnapshot>);

    fn delete(&mut self, path: &Path);

    fn entries(&self) -> Vec<Arc<DiscoverySnapshot>>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache that lives and dies with the session.
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    snapshots: HashMap<PathBuf, Arc<DiscoverySnapshot>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn load(&mut self, path: &Path, signature: &str) -> Option<Arc<DiscoverySnapshot>> {
        self.snapshots.get(path).filter(|snapshot| snapshot.signature == signature).cloned()
    }

    fn peek(&self, path: &Path) -> Option<Arc<DiscoverySnapshot>> {
        self.snapshots.get(path).cloned()
    }

    fn store(&mut self, snapshot: Arc<DiscoverySnapshot>) {
        self.snapshots.insert(snapshot.file_path.clone(), snapshot);
    }

    fn delete(&mut self, path: &Path) {
        self.snapshots.remove(path);
    }

    fn entries(&self) -> Vec<Arc<DiscoverySnapshot>> {
        self.snapshots.values().cloned().collect()
    }

    fn clear(&mut self) {
        self.snapshots.clear();
    }

    fn len(&self) -> usize {
        self.snapshots.len()
    }
}

/// Disk-backed cache, one JSON file per snapshot under `root`.
///
/// Writes go through an in-memory index, so repeated lookups within a build
/// never re-read the file. Stale or unreadable entries are treated as absent.
#[derive(Debug)]
pub struct DiskSnapshotCache {
    root: PathBuf,
    analyzer_id: String,
    evaluator_id: String,
    index: HashMap<PathBuf, Arc<DiscoverySnapshot>>,
}

impl DiskSnapshotCache {
    pub fn new(
        root: impl Into<PathBuf>,
        analyzer_id: impl Into<String>,
        evaluator_id: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            analyzer_id: analyzer_id.into(),
            evaluator_id: evaluator_id.into(),
            index: HashMap::new(),
        }
    }

    /// Path of the entry file for `path`.
    pub fn entry_path(&self, path: &Path) -> PathBuf {
        let mut hasher = md5::Md5::new();
        hasher.update(cache_key(&self.analyzer_id, &self.evaluator_id, path).as_bytes());
        self.root.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    fn read_entry(&self, path: &Path) -> Option<Arc<DiscoverySnapshot>> {
        let entry_path = self.entry_path(path);
        if !entry_path.exists() {
            return None;
        }
        let snapshot: DiscoverySnapshot = match utils::read_json_file(&entry_path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("dropping unreadable cache entry \"{}\": {err}", entry_path.display());
                let _ = fs::remove_file(&entry_path);
                return None;
            }
        };
        if snapshot.analyzer_id != self.analyzer_id {
            trace!(
                "cache entry for \"{}\" was written by analyzer \"{}\"",
                path.display(),
                snapshot.analyzer_id
            );
            return None;
        }
        Some(Arc::new(snapshot))
    }

    fn lookup(&self, path: &Path) -> Option<Arc<DiscoverySnapshot>> {
        self.index.get(path).cloned().or_else(|| self.read_entry(path))
    }

    fn persist(&self, snapshot: &DiscoverySnapshot) -> Result<()> {
        utils::write_json_file(snapshot, &self.entry_path(&snapshot.file_path))
    }
}

impl SnapshotCache for DiskSnapshotCache {
    fn load(&mut self, path: &Path, signature: &str) -> Option<Arc<DiscoverySnapshot>> {
        let snapshot = self.lookup(path)?;
        if snapshot.signature != signature {
            return None;
        }
        self.index.insert(path.to_path_buf(), Arc::clone(&snapshot));
        Some(snapshot)
    }

    fn peek(&self, path: &Path) -> Option<Arc<DiscoverySnapshot>> {
        self.lookup(path)
    }

    fn store(&mut self, snapshot: Arc<DiscoverySnapshot>) {
        if let Err(err) = self.persist(&snapshot) {
            warn!("failed to persist cache entry for \"{}\": {err}", snapshot.file_path.display());
        }
        self.index.insert(snapshot.file_path.clone(), snapshot);
    }

    fn delete(&mut self, path: &Path) {
        self.index.remove(path);
        let _ = fs::remove_file(self.entry_path(path));
    }

    fn entries(&self) -> Vec<Arc<DiscoverySnapshot>> {
        self.index.values().cloned().collect()
    }

    fn clear(&mut self) {
        for path in self.index.keys() {
            let _ = fs::remove_file(self.entry_path(path));
        }
        self.index.clear();
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

/// The string hashed into disk entry names; exposed for diagnostics and
/// tests.
pub fn cache_key(analyzer_id: &str, evaluator_id: &str, path: &Path) -> String {
    format!("{analyzer_id}::{evaluator_id}::{}", utils::normalize_slashes(path))
}
