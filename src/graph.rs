//! Dependency graph validation and change propagation.

use crate::{
    discovery::{self, DiscoverySnapshot},
    error::{BuildError, Result},
    utils,
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

/// Ensures every non-external, non-type-only import resolves to a snapshot
/// inside the set. Fails on the first missing edge; nothing is repaired.
pub fn validate_dependency_graph(
    snapshots: &BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
) -> Result<()> {
    for (path, snapshot) in snapshots {
        for import in &snapshot.analysis.imports {
            if import.is_type_only || !discovery::is_relative_specifier(&import.source) {
                continue;
            }
            let resolved = snapshot
                .dependencies
                .iter()
                .find(|dep| dep.specifier == import.source)
                .and_then(|dep| dep.resolved_path.as_ref());
            let resolved_in_set =
                resolved.map_or(false, |target| snapshots.contains_key(&utils::normalize_lexically(target)));
            if !resolved_in_set {
                return Err(BuildError::MissingImport {
                    importing_file: path.clone(),
                    specifier: import.source.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Inverted import graph: `imported -> importers`.
///
/// Every snapshot appears as a key, even with no importers, so membership
/// checks double as "known file" checks during change propagation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleAdjacency {
    importers: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl ModuleAdjacency {
    pub fn from_snapshots(snapshots: &BTreeMap<PathBuf, Arc<DiscoverySnapshot>>) -> Self {
        let mut importers: BTreeMap<PathBuf, BTreeSet<PathBuf>> =
            snapshots.keys().map(|path| (path.clone(), BTreeSet::new())).collect();

        for (importer, snapshot) in snapshots {
            let mut edges: Vec<PathBuf> =
                snapshot.resolved_dependencies().map(|p| utils::normalize_lexically(p)).collect();

            // Runtime-inserted modules carry imports the analyzer saw but no
            // tracked dependency edges; re-resolve those against the snapshot
            // set itself.
            if edges.is_empty() {
                edges = runtime_resolved_edges(importer, snapshot, snapshots);
            }

            for imported in edges {
                if let Some(entry) = importers.get_mut(&imported) {
                    entry.insert(importer.clone());
                }
            }
        }
        Self { importers }
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    pub fn importers_of(&self, path: &Path) -> impl Iterator<Item = &PathBuf> {
        self.importers.get(path).into_iter().flatten()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.importers.contains_key(path)
    }

    /// Transitive importers of `seeds`, including the seeds themselves.
    pub fn affected_files(
        &self,
        seeds: impl IntoIterator<Item = PathBuf>,
    ) -> BTreeSet<PathBuf> {
        let mut affected: BTreeSet<PathBuf> = BTreeSet::new();
        let mut pending: VecDeque<PathBuf> = VecDeque::new();
        for seed in seeds {
            if affected.insert(seed.clone()) {
                pending.push_back(seed);
            }
        }
        while let Some(path) = pending.pop_front() {
            for importer in self.importers_of(&path) {
                if affected.insert(importer.clone()) {
                    pending.push_back(importer.clone());
                }
            }
        }
        affected
    }
}

fn runtime_resolved_edges(
    importer: &Path,
    snapshot: &DiscoverySnapshot,
    snapshots: &BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
) -> Vec<PathBuf> {
    let Some(dir) = importer.parent() else { return Vec::new() };
    let mut edges = Vec::new();
    for import in &snapshot.analysis.imports {
        if import.is_type_only || !discovery::is_relative_specifier(&import.source) {
            continue;
        }
        let exists = |candidate: &Path| snapshots.contains_key(&utils::normalize_lexically(candidate));
        if let Some(resolved) = discovery::resolve_relative(dir, &import.source, &exists) {
            trace!(
                "runtime-resolved \"{}\" -> \"{}\"",
                import.source,
                resolved.display()
            );
            edges.push(resolved);
        }
    }
    edges
}
