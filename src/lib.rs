//! Incremental build orchestrator for typed GraphQL client definitions.
//!
//! The crate scans a TypeScript source tree from a set of entry paths,
//! discovers GraphQL definitions (operations, fragments, models, slices)
//! embedded in the sources, resolves the cross-file dependency graph,
//! evaluates every definition into a normalized element, and emits a
//! [`BuilderArtifact`] keyed by canonical ids for downstream transformers.
//! A long-lived [`BuilderSession`] keeps discovery snapshots, fingerprints
//! and the import adjacency so successive builds run incrementally against a
//! reported [`ChangeSet`].
//!
//! ```no_run
//! use gql_build::{ChangeSet, SessionBuilder};
//!
//! let mut session = SessionBuilder::default()
//!     .entrypoint("/work/src/index.ts")
//!     .build()?;
//! let artifact = session.build_initial()?;
//!
//! // after editing a file:
//! let artifact = session.update(&ChangeSet::updated_files(["/work/src/user.ts"]))?;
//! # let _ = artifact;
//! # Ok::<(), gql_build::BuildError>(())
//! ```

#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{BuildError, Result};

pub mod analyzer;
pub use analyzer::{
    AnalyzerInput, AnalyzerOptions, AstAnalyzer, Diagnostic, DiagnosticKind, ModuleAnalysis,
    ModuleDefinition, ModuleExport, ModuleImport, Severity, SwcAnalyzer,
};

pub mod identity;
pub use identity::CanonicalId;

pub mod fingerprint;
pub use fingerprint::{FileFingerprint, FingerprintMemo};

pub mod filesystem;
pub use filesystem::{FileStat, FileSystem, OsFileSystem};

pub mod effects;
pub use effects::{Effect, EffectProgram, EffectValue, ProgramStep, SyncScheduler};

pub mod discovery;
pub use discovery::{CacheStats, DiscoveredDependency, DiscoverySnapshot};

pub mod cache;
pub use cache::{DiskSnapshotCache, MemorySnapshotCache, SnapshotCache};

pub mod graph;
pub use graph::ModuleAdjacency;

pub mod evaluator;
pub use evaluator::{
    Element, ElementHandle, ElementKind, IntermediateModule, ModuleGenerator, ModuleRegistry,
    ModuleStep, Namespace, NamespaceEntry, Prebuild, EVALUATOR_ID,
};

pub mod artifact;
pub use artifact::{BuildReport, BuilderArtifact, BuilderArtifactElement};

mod build;
pub use build::{ChangeSet, SessionStats};

pub mod utils;

use std::{
    collections::BTreeSet,
    path::PathBuf,
};

/// A long-lived builder session.
///
/// Owns the snapshot cache, the fingerprint memo, the import adjacency and
/// the intermediate-module registry; [`build_initial`](Self::build_initial)
/// and [`update`](Self::update) drive the pipeline against that state.
/// Callers serialize their builds; a session is not meant to run two builds
/// at once.
pub struct BuilderSession<A = SwcAnalyzer, C = MemorySnapshotCache>
where
    A: AstAnalyzer,
    C: SnapshotCache,
{
    pub(crate) analyzer: A,
    pub(crate) cache: C,
    pub(crate) fs: Box<dyn FileSystem>,
    pub(crate) entrypoints: BTreeSet<PathBuf>,
    pub(crate) fingerprints: FingerprintMemo,
    pub(crate) adjacency: ModuleAdjacency,
    pub(crate) registry: ModuleRegistry,
    pub(crate) snapshots:
        std::collections::BTreeMap<PathBuf, std::sync::Arc<DiscoverySnapshot>>,
    pub(crate) last_artifact: Option<BuilderArtifact>,
}

impl BuilderSession {
    /// Convenience constructor for the default analyzer and in-memory cache.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }
}

impl<A, C> std::fmt::Debug for BuilderSession<A, C>
where
    A: AstAnalyzer,
    C: SnapshotCache,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderSession").finish_non_exhaustive()
    }
}

impl<A: AstAnalyzer, C: SnapshotCache> BuilderSession<A, C> {
    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

/// Configures and creates a [`BuilderSession`].
#[must_use]
pub struct SessionBuilder<A = SwcAnalyzer, C = MemorySnapshotCache> {
    analyzer: A,
    cache: C,
    fs: Box<dyn FileSystem>,
    entrypoints: BTreeSet<PathBuf>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            analyzer: SwcAnalyzer::default(),
            cache: MemorySnapshotCache::new(),
            fs: Box::new(OsFileSystem),
            entrypoints: BTreeSet::new(),
        }
    }
}

impl<A: AstAnalyzer, C: SnapshotCache> SessionBuilder<A, C> {
    /// Adds one entry path. Entry paths must be absolute.
    pub fn entrypoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.entrypoints.insert(path.into());
        self
    }

    pub fn entrypoints<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.entrypoints.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Swaps in a different analyzer backend.
    pub fn analyzer<B: AstAnalyzer>(self, analyzer: B) -> SessionBuilder<B, C> {
        SessionBuilder { analyzer, cache: self.cache, fs: self.fs, entrypoints: self.entrypoints }
    }

    /// Swaps in a different snapshot cache.
    pub fn cache<D: SnapshotCache>(self, cache: D) -> SessionBuilder<A, D> {
        SessionBuilder { analyzer: self.analyzer, cache, fs: self.fs, entrypoints: self.entrypoints }
    }

    /// Swaps in a different filesystem capability.
    pub fn file_system(mut self, fs: Box<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn build(self) -> Result<BuilderSession<A, C>> {
        let mut entrypoints = BTreeSet::new();
        for path in self.entrypoints {
            if !path.is_absolute() {
                return Err(BuildError::NonAbsolutePath { path });
            }
            entrypoints.insert(utils::normalize_lexically(&path));
        }
        Ok(BuilderSession {
            analyzer: self.analyzer,
            cache: self.cache,
            fs: self.fs,
            entrypoints,
            fingerprints: FingerprintMemo::new(),
            adjacency: ModuleAdjacency::default(),
            registry: ModuleRegistry::new(),
            snapshots: Default::default(),
            last_artifact: None,
        })
    }
}

impl SnapshotCache for Box<dyn SnapshotCache> {
    fn load(
        &mut self,
        path: &std::path::Path,
        signature: &str,
    ) -> Option<std::sync::Arc<DiscoverySnapshot>> {
        (**self).load(path, signature)
    }

    fn peek(&self, path: &std::path::Path) -> Option<std::sync::Arc<DiscoverySnapshot>> {
        (**self).peek(path)
    }

    fn store(&mut self, snapshot: std::sync::Arc<DiscoverySnapshot>) {
        (**self).store(snapshot)
    }

    fn delete(&mut self, path: &std::path::Path) {
        (**self).delete(path)
    }

    fn entries(&self) -> Vec<std::sync::Arc<DiscoverySnapshot>> {
        (**self).entries()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Configuration for [`create_builder_service`].
#[derive(Debug, Default)]
pub struct ServiceConfig {
    /// Absolute entry paths the scan starts from.
    pub entrypoints: Vec<PathBuf>,
    /// Directory for the disk-backed snapshot cache; in-memory when absent.
    pub cache_dir: Option<PathBuf>,
    /// Helper-binding recognition options.
    pub analyzer: AnalyzerOptions,
}

/// Facade exposing the session to build tooling.
pub struct BuilderService {
    session: BuilderSession<SwcAnalyzer, Box<dyn SnapshotCache>>,
}

impl BuilderService {
    /// Runs a full build.
    pub fn build(&mut self) -> Result<BuilderArtifact> {
        self.session.build_initial()
    }

    /// Applies a change set incrementally.
    pub fn update(&mut self, change_set: &ChangeSet) -> Result<BuilderArtifact> {
        self.session.update(change_set)
    }

    pub fn session(&self) -> &BuilderSession<SwcAnalyzer, Box<dyn SnapshotCache>> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut BuilderSession<SwcAnalyzer, Box<dyn SnapshotCache>> {
        &mut self.session
    }
}

/// Creates the builder service for the given configuration.
pub fn create_builder_service(config: ServiceConfig) -> Result<BuilderService> {
    let analyzer = SwcAnalyzer::new(config.analyzer);
    let cache: Box<dyn SnapshotCache> = match &config.cache_dir {
        Some(dir) => Box::new(DiskSnapshotCache::new(
            dir.clone(),
            analyzer.analyzer_id(),
            EVALUATOR_ID,
        )),
        None => Box::new(MemorySnapshotCache::new()),
    };
    let session = SessionBuilder::default()
        .analyzer(analyzer)
        .cache(cache)
        .entrypoints(config.entrypoints)
        .build()?;
    Ok(BuilderService { session })
}
