//! Intermediate modules and their cooperative evaluation.
//!
//! The registry holds one generator-backed [`IntermediateModule`] per source
//! file plus every [`Element`] registered under a canonical id. Module
//! evaluation runs on an iterative trampoline: frames are explicit, cycles
//! are observable, and a dependency chain of any length uses constant call
//! stack. Elements evaluate strictly after all modules, through the effect
//! schedulers.

use crate::{
    discovery::DiscoverySnapshot,
    effects::{Effect, EffectContext, EffectProgram, EffectValue, ElementRuntime, ProgramStep, SyncScheduler},
    error::{BuildError, Result},
    filesystem::FileSystem,
    identity::CanonicalId,
    utils,
};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

mod element;
mod generator;

pub use element::{
    element_from_definition, embedded_document, AsyncDefine, DefineFuture, Element, ElementHandle,
    ElementKind, FragmentPrebuild, ModelPrebuild, OperationPrebuild, OperationType, Prebuild,
    SlicePrebuild, SyncDefine,
};
pub use generator::{GeneratorFactory, IntermediateModule, ModuleGenerator, ModuleStep};

/// Version tag of the evaluation semantics, part of disk cache keying.
pub const EVALUATOR_ID: &str = "trampoline-1";

/// Evaluated shape of a module: element leaves and nested records.
pub type Namespace = BTreeMap<String, NamespaceEntry>;

#[derive(Clone, Debug)]
pub enum NamespaceEntry {
    Element(ElementHandle),
    Namespace(Namespace),
}

/// Registry of intermediate modules and elements for one session.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<PathBuf, IntermediateModule>,
    elements: BTreeMap<CanonicalId, ElementHandle>,
    /// Files with at least one GraphQL definition; consulted by the cycle
    /// relaxation rule.
    definition_files: HashSet<PathBuf>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the module (and its elements) derived from `snapshot`.
    pub fn apply_snapshot(&mut self, snapshot: &DiscoverySnapshot) -> Result<()> {
        self.remove_file(&snapshot.file_path);
        let (module, handles) = IntermediateModule::from_snapshot(snapshot)?;
        if snapshot.analysis.has_definitions() {
            self.definition_files.insert(snapshot.file_path.clone());
        }
        self.modules.insert(snapshot.file_path.clone(), module);
        for handle in handles {
            self.register_element(handle)?;
        }
        Ok(())
    }

    /// Registers a hand-built module. `has_definitions` feeds the cycle
    /// relaxation rule.
    pub fn register_module(&mut self, module: IntermediateModule, has_definitions: bool) {
        let path = module.file_path().to_path_buf();
        if has_definitions {
            self.definition_files.insert(path.clone());
        } else {
            self.definition_files.remove(&path);
        }
        self.modules.insert(path, module);
    }

    pub fn register_element(&mut self, handle: ElementHandle) -> Result<()> {
        if self.elements.contains_key(&handle.id) {
            return Err(BuildError::AlreadyRegistered { id: handle.id });
        }
        self.elements.insert(handle.id.clone(), handle);
        Ok(())
    }

    /// Drops the module registered for `path` and every element that lives in
    /// that file.
    pub fn remove_file(&mut self, path: &Path) {
        self.modules.remove(path);
        self.definition_files.remove(path);
        self.elements.retain(|id, _| !id.belongs_to(path));
    }

    pub fn contains_module(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn element(&self, id: &CanonicalId) -> Option<&ElementHandle> {
        self.elements.get(id)
    }

    pub fn element_ids(&self) -> Vec<CanonicalId> {
        self.elements.keys().cloned().collect()
    }

    /// Evaluates every registered module. Each generator runs at most once;
    /// results are shared through the evaluation cache.
    pub fn evaluate_modules(&self) -> Result<BTreeMap<PathBuf, Namespace>> {
        let mut evaluated = BTreeMap::new();
        for path in self.modules.keys() {
            if !evaluated.contains_key(path) {
                self.run_trampoline(path, &mut evaluated)?;
            }
        }
        Ok(evaluated)
    }

    fn run_trampoline(
        &self,
        root: &Path,
        evaluated: &mut BTreeMap<PathBuf, Namespace>,
    ) -> Result<()> {
        struct Frame {
            path: PathBuf,
            generator: Box<dyn ModuleGenerator>,
            pending: Option<Namespace>,
        }

        let root_module = self
            .modules
            .get(root)
            .ok_or_else(|| BuildError::ModuleNotFound { path: root.to_path_buf() })?;
        let mut stack = vec![Frame {
            path: root.to_path_buf(),
            generator: root_module.generator(),
            pending: None,
        }];
        let mut in_progress: HashSet<PathBuf> = HashSet::from([root.to_path_buf()]);

        loop {
            let (current_path, step) = {
                let Some(frame) = stack.last_mut() else { break };
                (frame.path.clone(), frame.generator.resume(frame.pending.take())?)
            };
            match step {
                ModuleStep::Done(namespace) => {
                    trace!("module evaluated: \"{}\"", current_path.display());
                    stack.pop();
                    in_progress.remove(&current_path);
                    if let Some(parent) = stack.last_mut() {
                        parent.pending = Some(namespace.clone());
                    }
                    evaluated.insert(current_path, namespace);
                }
                ModuleStep::Import(target) => {
                    let target = utils::normalize_lexically(&target);
                    if let Some(cached) = evaluated.get(&target) {
                        let namespace = cached.clone();
                        if let Some(frame) = stack.last_mut() {
                            frame.pending = Some(namespace);
                        }
                    } else if in_progress.contains(&target) {
                        let strict = self.definition_files.contains(&target)
                            && self.definition_files.contains(&current_path);
                        if strict {
                            let mut chain: Vec<PathBuf> = match stack
                                .iter()
                                .position(|frame| frame.path == target)
                            {
                                Some(start) => {
                                    stack[start..].iter().map(|frame| frame.path.clone()).collect()
                                }
                                None => vec![current_path],
                            };
                            chain.push(target);
                            return Err(BuildError::CircularDependency { chain });
                        }
                        trace!(
                            "relaxing import cycle \"{}\" -> \"{}\"",
                            current_path.display(),
                            target.display()
                        );
                        if let Some(frame) = stack.last_mut() {
                            frame.pending = Some(Namespace::new());
                        }
                    } else {
                        let module = self.modules.get(&target).ok_or_else(|| {
                            BuildError::ModuleNotFound { path: target.clone() }
                        })?;
                        in_progress.insert(target.clone());
                        stack.push(Frame {
                            path: target,
                            generator: module.generator(),
                            pending: None,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl ElementRuntime for ModuleRegistry {
    fn evaluate_sync(&self, id: &CanonicalId) -> Result<Prebuild> {
        let handle = self
            .element(id)
            .ok_or_else(|| BuildError::MissingRuntimeElement { id: id.clone() })?;
        handle.element.define_sync().map_err(|err| evaluation_error(id, err))
    }

    fn evaluate_deferred(&self, id: &CanonicalId) -> DefineFuture {
        let Some(handle) = self.element(id) else {
            let err = BuildError::MissingRuntimeElement { id: id.clone() };
            return Box::pin(std::future::ready(Err(err)));
        };
        let future = handle.element.define_deferred();
        let id = id.clone();
        Box::pin(async move { future.await.map_err(|err| evaluation_error(&id, err)) })
    }
}

fn evaluation_error(id: &CanonicalId, err: BuildError) -> BuildError {
    match err {
        already @ BuildError::Evaluation { .. } => already,
        other => BuildError::Evaluation {
            canonical_id: Some(id.clone()),
            file_path: None,
            message: other.to_string(),
        },
    }
}

/// Program that evaluates a fixed set of elements through the scheduler.
pub struct ElementEvaluationProgram {
    ids: Vec<CanonicalId>,
    yielded: bool,
}

impl ElementEvaluationProgram {
    pub fn new(ids: Vec<CanonicalId>) -> Self {
        Self { ids, yielded: false }
    }
}

impl EffectProgram for ElementEvaluationProgram {
    type Output = BTreeMap<CanonicalId, Prebuild>;

    fn resume(&mut self, input: Option<EffectValue>) -> Result<ProgramStep<Self::Output>> {
        if !self.yielded {
            self.yielded = true;
            let effects =
                self.ids.iter().cloned().map(Effect::ElementEvaluation).collect();
            return Ok(ProgramStep::Yield(Effect::Parallel(effects)));
        }
        let Some(EffectValue::Many(values)) = input else {
            return Err(BuildError::msg("element evaluation produced an unexpected effect value"));
        };
        if values.len() != self.ids.len() {
            return Err(BuildError::msg("element evaluation returned a mismatched value count"));
        }
        let mut prebuilds = BTreeMap::new();
        for (id, value) in self.ids.iter().zip(values) {
            let EffectValue::Evaluated(prebuild) = value else {
                return Err(BuildError::msg(
                    "element evaluation produced an unexpected effect value",
                ));
            };
            prebuilds.insert(id.clone(), prebuild);
        }
        Ok(ProgramStep::Return(prebuilds))
    }
}

/// Runs every registered element's define closure on the synchronous
/// scheduler. Fails if any element requires asynchronous evaluation.
pub fn evaluate_elements(
    registry: &ModuleRegistry,
    fs: &dyn FileSystem,
) -> Result<BTreeMap<CanonicalId, Prebuild>> {
    let scheduler = SyncScheduler::new(EffectContext { fs, elements: Some(registry) });
    scheduler.run(ElementEvaluationProgram::new(registry.element_ids()))
}

/// Runs every registered element on the asynchronous scheduler; independent
/// elements evaluate in parallel.
#[cfg(feature = "async")]
pub async fn evaluate_elements_async(
    registry: &ModuleRegistry,
    fs: &dyn FileSystem,
) -> Result<BTreeMap<CanonicalId, Prebuild>> {
    let scheduler = crate::effects::AsyncScheduler::new(EffectContext { fs, elements: Some(registry) });
    scheduler.run(ElementEvaluationProgram::new(registry.element_ids())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::OsFileSystem;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Generator that yields each import once, then finishes empty.
    struct ChainGenerator {
        imports: Vec<PathBuf>,
        next: usize,
    }

    impl ModuleGenerator for ChainGenerator {
        fn resume(&mut self, _resolved: Option<Namespace>) -> Result<ModuleStep> {
            if self.next < self.imports.len() {
                let import = self.imports[self.next].clone();
                self.next += 1;
                Ok(ModuleStep::Import(import))
            } else {
                Ok(ModuleStep::Done(Namespace::new()))
            }
        }
    }

    fn chain_module(path: &str, imports: Vec<&str>) -> IntermediateModule {
        let imports: Vec<PathBuf> = imports.into_iter().map(PathBuf::from).collect();
        IntermediateModule::new(path, move || {
            Box::new(ChainGenerator { imports: imports.clone(), next: 0 })
        })
    }

    #[test]
    fn linear_chain_of_5000_modules_evaluates_iteratively() {
        let mut registry = ModuleRegistry::new();
        let total = 5000;
        for index in 0..total {
            let path = format!("/chain/m{index:05}.ts");
            let imports = if index + 1 < total {
                vec![format!("/chain/m{:05}.ts", index + 1)]
            } else {
                vec![]
            };
            let imports: Vec<&str> = imports.iter().map(String::as_str).collect();
            registry.register_module(chain_module(&path, imports), false);
        }
        let evaluated = registry.evaluate_modules().unwrap();
        assert_eq!(evaluated.len(), total);
    }

    #[test]
    fn diamond_dependencies_evaluate_shared_module_once() {
        let instantiations = Arc::new(AtomicUsize::new(0));
        let mut registry = ModuleRegistry::new();
        registry.register_module(chain_module("/w/a.ts", vec!["/w/b.ts", "/w/c.ts"]), false);
        registry.register_module(chain_module("/w/b.ts", vec!["/w/d.ts"]), false);
        registry.register_module(chain_module("/w/c.ts", vec!["/w/d.ts"]), false);

        let counter = Arc::clone(&instantiations);
        registry.register_module(
            IntermediateModule::new("/w/d.ts", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(ChainGenerator { imports: vec![], next: 0 })
            }),
            false,
        );

        registry.evaluate_modules().unwrap();
        assert_eq!(instantiations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cycles_between_definition_modules_are_fatal() {
        let mut registry = ModuleRegistry::new();
        registry.register_module(chain_module("/w/a.ts", vec!["/w/b.ts"]), true);
        registry.register_module(chain_module("/w/b.ts", vec!["/w/a.ts"]), true);
        let err = registry.evaluate_modules().unwrap_err();
        match err {
            BuildError::CircularDependency { chain } => {
                assert_eq!(
                    chain,
                    vec![
                        PathBuf::from("/w/a.ts"),
                        PathBuf::from("/w/b.ts"),
                        PathBuf::from("/w/a.ts"),
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cycles_with_a_plain_module_are_relaxed() {
        /// Records the namespace it was handed for its import.
        struct Observer {
            import: PathBuf,
            observed: Arc<AtomicUsize>,
            state: u8,
        }
        impl ModuleGenerator for Observer {
            fn resume(&mut self, resolved: Option<Namespace>) -> Result<ModuleStep> {
                self.state += 1;
                match self.state {
                    1 => Ok(ModuleStep::Import(self.import.clone())),
                    _ => {
                        let namespace = resolved.unwrap_or_default();
                        self.observed.store(namespace.len(), Ordering::SeqCst);
                        Ok(ModuleStep::Done(Namespace::new()))
                    }
                }
            }
        }

        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        let mut registry = ModuleRegistry::new();
        // a has definitions, the service module b does not
        registry.register_module(chain_module("/w/a.ts", vec!["/w/b.ts"]), true);
        let observed_clone = Arc::clone(&observed);
        registry.register_module(
            IntermediateModule::new("/w/b.ts", move || {
                Box::new(Observer {
                    import: PathBuf::from("/w/a.ts"),
                    observed: Arc::clone(&observed_clone),
                    state: 0,
                })
            }),
            false,
        );

        registry.evaluate_modules().unwrap();
        // b's view of the in-progress a was the empty namespace
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_imports_are_module_not_found() {
        let mut registry = ModuleRegistry::new();
        registry.register_module(chain_module("/w/a.ts", vec!["/w/ghost.ts"]), false);
        let err = registry.evaluate_modules().unwrap_err();
        assert_eq!(err.code(), "MODULE_NOT_FOUND");
    }

    #[test]
    fn duplicate_element_registration_is_rejected() {
        let mut registry = ModuleRegistry::new();
        let id = CanonicalId::new("/w/a.ts", "f").unwrap();
        let make = || {
            ElementHandle::new(
                id.clone(),
                Element::new_sync(ElementKind::Model, || {
                    Ok(Prebuild::Model(ModelPrebuild { typename: None, source: String::new() }))
                }),
            )
        };
        registry.register_element(make()).unwrap();
        let err = registry.register_element(make()).unwrap_err();
        assert_eq!(err.code(), "ARTIFACT_ALREADY_REGISTERED");
    }

    #[test]
    fn element_evaluation_runs_after_registration() {
        let mut registry = ModuleRegistry::new();
        let id = CanonicalId::new("/w/a.ts", "m").unwrap();
        registry
            .register_element(ElementHandle::new(
                id.clone(),
                Element::new_sync(ElementKind::Model, || {
                    Ok(Prebuild::Model(ModelPrebuild {
                        typename: Some("User".to_string()),
                        source: String::new(),
                    }))
                }),
            ))
            .unwrap();

        let fs = OsFileSystem;
        let prebuilds = evaluate_elements(&registry, &fs).unwrap();
        assert_eq!(prebuilds.len(), 1);
        assert_eq!(prebuilds[&id].kind(), ElementKind::Model);
    }

    #[test]
    fn sync_evaluation_rejects_async_defines() {
        let mut registry = ModuleRegistry::new();
        let id = CanonicalId::new("/w/a.ts", "m").unwrap();
        registry
            .register_element(ElementHandle::new(
                id.clone(),
                Element::new_async(ElementKind::Model, || {
                    Box::pin(std::future::ready(Ok(Prebuild::Model(ModelPrebuild {
                        typename: None,
                        source: String::new(),
                    }))))
                }),
            ))
            .unwrap();

        let fs = OsFileSystem;
        let err = evaluate_elements(&registry, &fs).unwrap_err();
        assert_eq!(err.code(), "EVALUATION_FAILED");
        assert!(err.to_string().contains("asynchronous define"));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_evaluation_runs_async_defines() {
        let mut registry = ModuleRegistry::new();
        let id = CanonicalId::new("/w/a.ts", "m").unwrap();
        registry
            .register_element(ElementHandle::new(
                id.clone(),
                Element::new_async(ElementKind::Model, || {
                    Box::pin(async {
                        Ok(Prebuild::Model(ModelPrebuild {
                            typename: Some("Async".to_string()),
                            source: String::new(),
                        }))
                    })
                }),
            ))
            .unwrap();

        let fs = OsFileSystem;
        let prebuilds = evaluate_elements_async(&registry, &fs).await.unwrap();
        assert_eq!(prebuilds.len(), 1);
    }

    #[test]
    fn removing_a_file_drops_its_elements() {
        let mut registry = ModuleRegistry::new();
        let id = CanonicalId::new("/w/a.ts", "f").unwrap();
        registry
            .register_element(ElementHandle::new(
                id.clone(),
                Element::new_sync(ElementKind::Fragment, || {
                    Ok(Prebuild::Fragment(FragmentPrebuild {
                        name: None,
                        type_condition: None,
                        document: None,
                    }))
                }),
            ))
            .unwrap();
        registry.register_module(chain_module("/w/a.ts", vec![]), true);

        registry.remove_file(Path::new("/w/a.ts"));
        assert_eq!(registry.module_count(), 0);
        assert_eq!(registry.element_count(), 0);
        assert!(registry.element(&id).is_none());
    }
}
