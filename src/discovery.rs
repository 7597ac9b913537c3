//! Source discovery.
//!
//! Walks the import graph breadth-first from the session's entry paths,
//! producing one [`DiscoverySnapshot`] per reachable file. The snapshot cache
//! is consulted per file: explicitly invalidated files bypass it, otherwise a
//! fingerprint fast path avoids re-reading and a signature match after a read
//! avoids re-analyzing.

use crate::{
    analyzer::{AnalyzerInput, AstAnalyzer, ModuleAnalysis},
    cache::SnapshotCache,
    effects::EffectIo,
    error::{BuildError, Result},
    filesystem::{FileStat, FileSystem},
    fingerprint::{self, FileFingerprint, FingerprintMemo},
    utils,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Extensions probed when resolving an extensionless relative specifier, in
/// priority order.
const PROBE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

/// Directory index files probed after the extension candidates.
const INDEX_CANDIDATES: &[&str] = &["index.ts", "index.tsx"];

/// Files that resolve but are never parsed; their analysis is empty.
const PASSTHROUGH_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx"];

/// One import edge as discovery resolved it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDependency {
    /// The specifier as written in the source.
    pub specifier: String,
    /// Absolute path of the resolved file, `None` when unresolved.
    pub resolved_path: Option<PathBuf>,
    /// Bare specifiers (packages) are external and never resolved.
    pub is_external: bool,
}

/// Cached analysis record for a single file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySnapshot {
    pub file_path: PathBuf,
    /// `file_path` with forward-slash separators, for cross-platform
    /// comparisons.
    pub normalized_file_path: String,
    /// Content hash of the source bytes.
    pub signature: String,
    pub fingerprint: FileFingerprint,
    /// Backend that produced `analysis`; snapshots from other backends are
    /// never reused.
    pub analyzer_id: String,
    pub created_at_ms: u64,
    pub analysis: ModuleAnalysis,
    pub dependencies: Vec<DiscoveredDependency>,
}

impl DiscoverySnapshot {
    /// Resolved paths of all non-external dependencies.
    pub fn resolved_dependencies(&self) -> impl Iterator<Item = &Path> {
        self.dependencies
            .iter()
            .filter(|dep| !dep.is_external)
            .filter_map(|dep| dep.resolved_path.as_deref())
    }
}

/// Per-build cache accounting. Every visited file increments exactly one
/// counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Snapshots reused through the fingerprint fast path.
    pub hits: usize,
    /// Files read and analyzed because no usable snapshot existed.
    pub misses: usize,
    /// Files whose cached snapshot was bypassed by explicit invalidation.
    pub skips: usize,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.hits + self.misses + self.skips
    }
}

/// Everything one discovery run produced.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub snapshots: BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
    pub stats: CacheStats,
}

/// Breadth-first scanner over the import graph. All file access funnels
/// through the synchronous effect scheduler.
pub(crate) struct DiscoveryScanner<'a, A, C> {
    analyzer: &'a A,
    cache: &'a mut C,
    fingerprints: &'a mut FingerprintMemo,
    io: EffectIo<'a>,
    invalidated: &'a HashSet<PathBuf>,
    stats: CacheStats,
}

impl<'a, A: AstAnalyzer, C: SnapshotCache> DiscoveryScanner<'a, A, C> {
    pub(crate) fn new(
        analyzer: &'a A,
        cache: &'a mut C,
        fingerprints: &'a mut FingerprintMemo,
        fs: &'a dyn FileSystem,
        invalidated: &'a HashSet<PathBuf>,
    ) -> Self {
        Self {
            analyzer,
            cache,
            fingerprints,
            io: EffectIo::new(fs),
            invalidated,
            stats: CacheStats::default(),
        }
    }

    pub(crate) fn scan(mut self, entrypoints: &BTreeSet<PathBuf>) -> Result<DiscoveryOutcome> {
        let mut pending: VecDeque<PathBuf> = VecDeque::new();
        for entry in entrypoints {
            let entry = utils::normalize_lexically(entry);
            if !self.io.is_file(&entry) {
                return Err(BuildError::EntryNotFound { path: utils::canonical_display(&entry) });
            }
            pending.push_back(entry);
        }

        let mut snapshots: BTreeMap<PathBuf, Arc<DiscoverySnapshot>> = BTreeMap::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();

        while let Some(path) = pending.pop_front() {
            let path = utils::normalize_lexically(&path);
            if !visited.insert(path.clone()) {
                continue;
            }
            let Some(snapshot) = self.visit(&path)? else {
                // vanished between probe and read; forget it
                continue;
            };
            for dependency in snapshot.resolved_dependencies() {
                let dependency = utils::normalize_lexically(dependency);
                if !visited.contains(&dependency) {
                    pending.push_back(dependency);
                }
            }
            snapshots.insert(path, snapshot);
        }

        debug!(
            files = snapshots.len(),
            hits = self.stats.hits,
            misses = self.stats.misses,
            skips = self.stats.skips,
            "discovery finished"
        );
        Ok(DiscoveryOutcome { snapshots, stats: self.stats })
    }

    fn visit(&mut self, path: &Path) -> Result<Option<Arc<DiscoverySnapshot>>> {
        let invalidated = self.invalidated.contains(path);
        let had_entry = self.cache.peek(path).is_some();

        if !invalidated {
            if let Some(cached) = self.cache.peek(path) {
                match self.stat_optional(path)? {
                    Some(stat) if cached.fingerprint.matches_stat(&stat) => {
                        trace!("fingerprint match, reusing snapshot for \"{}\"", path.display());
                        self.fingerprints.record(path.to_path_buf(), cached.fingerprint.clone());
                        self.stats.hits += 1;
                        return Ok(Some(cached));
                    }
                    Some(_) => {
                        trace!("fingerprint mismatch for \"{}\"", path.display());
                    }
                    None => {
                        trace!("cached file vanished: \"{}\"", path.display());
                        self.cache.delete(path);
                        self.fingerprints.invalidate(path);
                        return Ok(None);
                    }
                }
            }
        } else {
            trace!("explicitly invalidated: \"{}\"", path.display());
        }

        let Some(source) = self.read_optional(path)? else {
            self.cache.delete(path);
            self.fingerprints.invalidate(path);
            return Ok(None);
        };
        let signature = fingerprint::content_hash(&source);
        let stat = match self.stat_optional(path)? {
            Some(stat) => stat,
            None => {
                self.cache.delete(path);
                self.fingerprints.invalidate(path);
                return Ok(None);
            }
        };
        let fingerprint = FileFingerprint::new(&stat, signature.clone());

        // content-identical file with refreshed metadata keeps its analysis
        let reusable = if invalidated { None } else { self.cache.load(path, &signature) };
        let snapshot = match reusable {
            Some(previous) => {
                trace!("signature match, re-fingerprinting \"{}\"", path.display());
                Arc::new(DiscoverySnapshot { fingerprint, ..(*previous).clone() })
            }
            None => {
                let analysis = self.analyze(path, &source, &signature)?;
                let dependencies = self.derive_dependencies(path, &analysis);
                Arc::new(DiscoverySnapshot {
                    file_path: path.to_path_buf(),
                    normalized_file_path: utils::normalize_slashes(path),
                    signature,
                    fingerprint,
                    analyzer_id: self.analyzer.analyzer_id().to_string(),
                    created_at_ms: now_ms(),
                    analysis,
                    dependencies,
                })
            }
        };

        self.fingerprints.record(path.to_path_buf(), snapshot.fingerprint.clone());
        self.cache.store(Arc::clone(&snapshot));
        if invalidated && had_entry {
            self.stats.skips += 1;
        } else {
            self.stats.misses += 1;
        }
        Ok(Some(snapshot))
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        self.io.read_optional(path).map_err(|err| discovery_io(err, path))
    }

    fn stat_optional(&self, path: &Path) -> Result<Option<FileStat>> {
        self.io.stat_optional(path).map_err(|err| discovery_io(err, path))
    }

    fn analyze(&self, path: &Path, source: &str, signature: &str) -> Result<ModuleAnalysis> {
        if is_passthrough(path) {
            return Ok(ModuleAnalysis::empty(path.to_path_buf(), signature.to_string()));
        }
        self.analyzer.analyze(AnalyzerInput { file_path: path, source })
    }

    fn derive_dependencies(
        &self,
        path: &Path,
        analysis: &ModuleAnalysis,
    ) -> Vec<DiscoveredDependency> {
        let Some(dir) = path.parent() else { return Vec::new() };
        analysis
            .dependency_specifiers()
            .into_iter()
            .map(|specifier| {
                if is_relative_specifier(specifier) {
                    DiscoveredDependency {
                        specifier: specifier.to_string(),
                        resolved_path: resolve_relative(dir, specifier, &|p| self.io.is_file(p)),
                        is_external: false,
                    }
                } else {
                    DiscoveredDependency {
                        specifier: specifier.to_string(),
                        resolved_path: None,
                        is_external: true,
                    }
                }
            })
            .collect()
    }
}

/// Whether `specifier` addresses a file relative to the importer.
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Whether `path` is resolved without being parsed.
pub fn is_passthrough(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if PASSTHROUGH_EXTENSIONS.contains(&ext)
    )
}

/// Probes resolution candidates for a relative specifier, in order: the bare
/// path, extension variants, then directory index files.
pub fn resolve_relative(
    importer_dir: &Path,
    specifier: &str,
    exists: &dyn Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let base = utils::normalize_lexically(&importer_dir.join(specifier));
    for candidate in resolution_candidates(&base) {
        if exists(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// All paths probed for `base`, in probe order.
pub fn resolution_candidates(base: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(1 + PROBE_EXTENSIONS.len() + INDEX_CANDIDATES.len());
    candidates.push(base.to_path_buf());
    for extension in PROBE_EXTENSIONS {
        let mut with_extension = base.as_os_str().to_os_string();
        with_extension.push(".");
        with_extension.push(extension);
        candidates.push(PathBuf::from(with_extension));
    }
    for index in INDEX_CANDIDATES {
        candidates.push(base.join(index));
    }
    candidates
}

fn discovery_io(err: BuildError, path: &Path) -> BuildError {
    BuildError::DiscoveryIo { path: path.to_path_buf(), message: err.to_string() }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_specifiers_are_detected() {
        assert!(is_relative_specifier("./a"));
        assert!(is_relative_specifier("../a/b"));
        assert!(!is_relative_specifier("react"));
        assert!(!is_relative_specifier("@scope/pkg"));
    }

    #[test]
    fn candidates_probe_in_documented_order() {
        let candidates = resolution_candidates(Path::new("/w/src/a"));
        let rendered: Vec<String> =
            candidates.iter().map(|c| utils::normalize_slashes(c)).collect();
        assert_eq!(
            rendered,
            vec![
                "/w/src/a",
                "/w/src/a.ts",
                "/w/src/a.tsx",
                "/w/src/a.js",
                "/w/src/a.jsx",
                "/w/src/a/index.ts",
                "/w/src/a/index.tsx",
            ]
        );
    }

    #[test]
    fn resolution_returns_first_existing_candidate() {
        let exists = |p: &Path| p == Path::new("/w/src/b.tsx");
        let resolved = resolve_relative(Path::new("/w/src"), "./b", &exists);
        assert_eq!(resolved, Some(PathBuf::from("/w/src/b.tsx")));

        let nothing = |_: &Path| false;
        assert_eq!(resolve_relative(Path::new("/w/src"), "./b", &nothing), None);
    }

    #[test]
    fn parent_specifiers_normalize_lexically() {
        let exists = |p: &Path| p == Path::new("/w/lib/util.ts");
        let resolved = resolve_relative(Path::new("/w/src"), "../lib/util", &exists);
        assert_eq!(resolved, Some(PathBuf::from("/w/lib/util.ts")));
    }

    #[test]
    fn passthrough_extensions() {
        assert!(is_passthrough(Path::new("/w/a.js")));
        assert!(is_passthrough(Path::new("/w/a.mjs")));
        assert!(is_passthrough(Path::new("/w/a.cjs")));
        assert!(is_passthrough(Path::new("/w/a.jsx")));
        assert!(!is_passthrough(Path::new("/w/a.ts")));
        assert!(!is_passthrough(Path::new("/w/a.tsx")));
    }
}
