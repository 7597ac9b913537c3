//! The build pipeline.
//!
//! A build is driven through a small series of states: discovery produces
//! snapshots, validation proves the import graph closed, then the session
//! commits the new adjacency, refreshes the affected intermediate modules,
//! evaluates modules and elements, and aggregates the artifact. A single
//! error aborts the run and leaves the previous artifact in place.

use crate::{
    analyzer::AstAnalyzer,
    artifact::{self, BuildReport, BuilderArtifact},
    cache::SnapshotCache,
    discovery::{CacheStats, DiscoveryScanner, DiscoverySnapshot},
    error::Result,
    evaluator::{self, Prebuild},
    graph::{self, ModuleAdjacency},
    identity::CanonicalId,
    utils, BuilderSession,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

/// File mutations reported between two builds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub updated: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn added_files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self { added: paths.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn updated_files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self { updated: paths.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn removed_files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self { removed: paths.into_iter().map(Into::into).collect(), ..Default::default() }
    }
}

/// Observability counters for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStats {
    pub snapshot_count: usize,
    pub module_adjacency_size: usize,
}

/// Discovery finished; the snapshot set is complete but unproven.
struct Discovered {
    snapshots: BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
    stats: CacheStats,
    started: Instant,
}

impl Discovered {
    /// Advances by proving every non-external import resolves in the set.
    fn validate(self) -> Result<Validated> {
        graph::validate_dependency_graph(&self.snapshots)?;
        let adjacency = ModuleAdjacency::from_snapshots(&self.snapshots);
        Ok(Validated { snapshots: self.snapshots, stats: self.stats, adjacency, started: self.started })
    }
}

/// The graph is closed; ready to be committed into the session.
struct Validated {
    snapshots: BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
    stats: CacheStats,
    adjacency: ModuleAdjacency,
    started: Instant,
}

impl<A: AstAnalyzer, C: SnapshotCache> BuilderSession<A, C> {
    /// Runs the full pipeline with no prior state assumptions.
    pub fn build_initial(&mut self) -> Result<BuilderArtifact> {
        debug!(entrypoints = self.entrypoints.len(), "initial build");
        self.run_pipeline(HashSet::new())
    }

    /// Applies a change set and re-runs the pipeline incrementally.
    ///
    /// An empty change set with a previous artifact is a no-op returning that
    /// artifact unchanged.
    pub fn update(&mut self, change_set: &ChangeSet) -> Result<BuilderArtifact> {
        if change_set.is_empty() {
            if let Some(artifact) = &self.last_artifact {
                debug!("empty change set, returning previous artifact");
                return Ok(artifact.clone());
            }
        }
        let invalidated = self.apply_change_set(change_set);
        self.run_pipeline(invalidated)
    }

    /// Full pipeline with asynchronous element evaluation; independent
    /// elements run in parallel.
    #[cfg(feature = "async")]
    pub async fn build_initial_async(&mut self) -> Result<BuilderArtifact> {
        debug!(entrypoints = self.entrypoints.len(), "initial build (async)");
        let validated = self.prepare(HashSet::new())?;
        let prebuilds =
            evaluator::evaluate_elements_async(&self.registry, self.fs.as_ref()).await?;
        self.finish(validated, prebuilds)
    }

    /// Incremental pipeline with asynchronous element evaluation.
    #[cfg(feature = "async")]
    pub async fn update_async(&mut self, change_set: &ChangeSet) -> Result<BuilderArtifact> {
        if change_set.is_empty() {
            if let Some(artifact) = &self.last_artifact {
                return Ok(artifact.clone());
            }
        }
        let invalidated = self.apply_change_set(change_set);
        let validated = self.prepare(invalidated)?;
        let prebuilds =
            evaluator::evaluate_elements_async(&self.registry, self.fs.as_ref()).await?;
        self.finish(validated, prebuilds)
    }

    /// Purges session state for the mutated files and returns the invalidated
    /// set handed to discovery.
    fn apply_change_set(&mut self, change_set: &ChangeSet) -> HashSet<PathBuf> {
        let changed: Vec<PathBuf> = change_set
            .updated
            .iter()
            .chain(&change_set.removed)
            .map(|p| utils::normalize_lexically(p))
            .collect();
        let added: Vec<PathBuf> =
            change_set.added.iter().map(|p| utils::normalize_lexically(p)).collect();

        // transitive importers over the adjacency of the previous build
        let seeds = changed.iter().chain(&added).cloned();
        let affected = self.adjacency.affected_files(seeds);
        debug!(
            changed = changed.len(),
            affected = affected.len(),
            "applying change set"
        );

        for path in &changed {
            self.cache.delete(path);
            self.fingerprints.invalidate(path);
        }
        for path in change_set.removed.iter().map(|p| utils::normalize_lexically(p)) {
            self.registry.remove_file(&path);
            self.snapshots.remove(&path);
        }

        let mut invalidated: HashSet<PathBuf> = affected.into_iter().collect();
        invalidated.extend(changed);
        invalidated
    }

    fn run_pipeline(&mut self, invalidated: HashSet<PathBuf>) -> Result<BuilderArtifact> {
        let validated = self.prepare(invalidated)?;
        let prebuilds = evaluator::evaluate_elements(&self.registry, self.fs.as_ref())?;
        self.finish(validated, prebuilds)
    }

    /// Discovery, validation, commit and module evaluation; everything before
    /// elements run.
    fn prepare(&mut self, invalidated: HashSet<PathBuf>) -> Result<Validated> {
        let started = Instant::now();
        let scanner = DiscoveryScanner::new(
            &self.analyzer,
            &mut self.cache,
            &mut self.fingerprints,
            self.fs.as_ref(),
            &invalidated,
        );
        let outcome = scanner.scan(&self.entrypoints)?;
        let discovered =
            Discovered { snapshots: outcome.snapshots, stats: outcome.stats, started };
        let validated = discovered.validate()?;

        // discovery succeeded: the new adjacency replaces the old one
        let previous = std::mem::replace(&mut self.snapshots, validated.snapshots.clone());
        self.adjacency = validated.adjacency.clone();
        self.sync_registry(&previous)?;

        // modules evaluate before any element does
        let namespaces = self.registry.evaluate_modules()?;
        trace!(modules = namespaces.len(), "module evaluation finished");
        Ok(validated)
    }

    /// Replaces the intermediate modules of files whose snapshot changed and
    /// drops modules for files that disappeared.
    fn sync_registry(
        &mut self,
        previous: &BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
    ) -> Result<()> {
        for path in previous.keys() {
            if !self.snapshots.contains_key(path) {
                self.registry.remove_file(path);
            }
        }
        let mut replaced = 0usize;
        for (path, snapshot) in &self.snapshots {
            let unchanged = self.registry.contains_module(path)
                && previous.get(path).map_or(false, |old| Arc::ptr_eq(old, snapshot));
            if !unchanged {
                self.registry.apply_snapshot(snapshot)?;
                replaced += 1;
            }
        }
        trace!(replaced, total = self.snapshots.len(), "intermediate modules refreshed");
        Ok(())
    }

    /// Aggregates the artifact and commits it as the session's last build.
    fn finish(
        &mut self,
        validated: Validated,
        prebuilds: BTreeMap<CanonicalId, Prebuild>,
    ) -> Result<BuilderArtifact> {
        let report = BuildReport {
            duration_ms: validated.started.elapsed().as_millis() as u64,
            warnings: artifact::collect_warnings(&self.snapshots),
            cache: validated.stats,
        };
        let artifact = artifact::aggregate(&self.snapshots, &prebuilds, report)?;
        debug!(
            elements = artifact.len(),
            duration_ms = artifact.report.duration_ms,
            "build finished"
        );
        self.last_artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Atomic entry point mutation; takes effect on the next build.
    pub fn update_entrypoints<I, J, P, Q>(&mut self, to_add: I, to_remove: J)
    where
        I: IntoIterator<Item = P>,
        J: IntoIterator<Item = Q>,
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
    {
        for path in to_remove {
            self.entrypoints.remove(&utils::normalize_lexically(&path.into()));
        }
        for path in to_add {
            self.entrypoints.insert(utils::normalize_lexically(&path.into()));
        }
    }

    pub fn entrypoints(&self) -> &BTreeSet<PathBuf> {
        &self.entrypoints
    }

    /// Counters for observability surfaces.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            snapshot_count: self.snapshots.len(),
            module_adjacency_size: self.adjacency.len(),
        }
    }

    /// The artifact of the most recent successful build.
    pub fn last_artifact(&self) -> Option<&BuilderArtifact> {
        self.last_artifact.as_ref()
    }
}
