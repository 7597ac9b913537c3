//! Module generators.
//!
//! Every source file is represented by a generator factory. A generator is a
//! single-shot state machine: each [`resume`](ModuleGenerator::resume) either
//! requests another module's namespace or finishes with its own. The
//! trampoline in the registry drives these machines iteratively, so chains of
//! arbitrary depth never grow the call stack.

use super::{
    element::{element_from_definition, ElementHandle},
    Namespace, NamespaceEntry,
};
use crate::{
    discovery::DiscoverySnapshot,
    error::{BuildError, Result},
    utils,
};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// One step of a module generator.
#[derive(Debug)]
pub enum ModuleStep {
    /// The generator needs `file_path`'s evaluated namespace before it can
    /// continue.
    Import(PathBuf),
    /// The generator finished with its own namespace.
    Done(Namespace),
}

/// Single-shot cooperative module evaluation.
pub trait ModuleGenerator: Send {
    /// Advances the machine. The first call receives `None`; every later call
    /// receives the namespace of the import requested by the previous step
    /// (the empty namespace when a cycle was relaxed).
    fn resume(&mut self, resolved: Option<Namespace>) -> Result<ModuleStep>;
}

pub type GeneratorFactory = Arc<dyn Fn() -> Box<dyn ModuleGenerator> + Send + Sync>;

/// Generator-backed representation of a source file.
#[derive(Clone)]
pub struct IntermediateModule {
    file_path: PathBuf,
    factory: GeneratorFactory,
}

impl IntermediateModule {
    pub fn new(
        file_path: impl Into<PathBuf>,
        factory: impl Fn() -> Box<dyn ModuleGenerator> + Send + Sync + 'static,
    ) -> Self {
        Self { file_path: file_path.into(), factory: Arc::new(factory) }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Instantiates a fresh generator for one evaluation.
    pub fn generator(&self) -> Box<dyn ModuleGenerator> {
        (self.factory)()
    }

    /// Builds the standard module for a discovery snapshot, together with the
    /// elements its definitions evaluate into.
    pub fn from_snapshot(snapshot: &DiscoverySnapshot) -> Result<(Self, Vec<ElementHandle>)> {
        let imports: Vec<PathBuf> =
            snapshot.resolved_dependencies().map(|p| utils::normalize_lexically(p)).collect();

        let mut handles = Vec::new();
        let mut namespace = Namespace::new();
        for definition in &snapshot.analysis.definitions {
            let Some(handle) = element_from_definition(definition) else { continue };
            let segments: Vec<&str> = definition.ast_path.split('.').collect();
            insert_nested(&mut namespace, &segments, handle.clone())?;
            handles.push(handle);
        }

        let module = Self {
            file_path: snapshot.file_path.clone(),
            factory: Arc::new(move || {
                Box::new(AnalysisGenerator {
                    imports: imports.clone(),
                    namespace: namespace.clone(),
                    next_import: 0,
                    finished: false,
                })
            }),
        };
        Ok((module, handles))
    }
}

impl fmt::Debug for IntermediateModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateModule").field("file_path", &self.file_path).finish()
    }
}

/// Standard generator derived from a module analysis: request every resolved
/// import in order, then publish the namespace of synthesized elements.
struct AnalysisGenerator {
    imports: Vec<PathBuf>,
    namespace: Namespace,
    next_import: usize,
    finished: bool,
}

impl ModuleGenerator for AnalysisGenerator {
    fn resume(&mut self, _resolved: Option<Namespace>) -> Result<ModuleStep> {
        if self.finished {
            return Err(BuildError::msg("module generator resumed after completion"));
        }
        if self.next_import < self.imports.len() {
            let import = self.imports[self.next_import].clone();
            self.next_import += 1;
            return Ok(ModuleStep::Import(import));
        }
        self.finished = true;
        Ok(ModuleStep::Done(std::mem::take(&mut self.namespace)))
    }
}

fn insert_nested(
    namespace: &mut Namespace,
    segments: &[&str],
    handle: ElementHandle,
) -> Result<()> {
    match segments {
        [] => Err(BuildError::msg("definition with an empty naming path")),
        [leaf] => {
            if namespace.contains_key(*leaf) {
                return Err(BuildError::AlreadyRegistered { id: handle.id });
            }
            namespace.insert((*leaf).to_string(), NamespaceEntry::Element(handle));
            Ok(())
        }
        [head, rest @ ..] => {
            let entry = namespace
                .entry((*head).to_string())
                .or_insert_with(|| NamespaceEntry::Namespace(Namespace::new()));
            match entry {
                NamespaceEntry::Namespace(nested) => insert_nested(nested, rest, handle),
                // a binding cannot be both a call result and an object; the
                // analyzer guarantees prefix-free paths
                NamespaceEntry::Element(_) => Err(BuildError::AlreadyRegistered { id: handle.id }),
            }
        }
    }
}
