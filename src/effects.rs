//! Yield-based effect scheduling.
//!
//! An [`EffectProgram`] is a resumable state machine that yields [`Effect`]
//! nodes and finally returns a value. Two schedulers drive programs: the
//! [`SyncScheduler`] executes every effect in a tight blocking loop, and the
//! `AsyncScheduler` (behind the `async` feature) awaits effect
//! implementations and fans independent effects of a [`Effect::Parallel`]
//! node out concurrently.

use crate::{
    error::{BuildError, Result},
    evaluator::Prebuild,
    filesystem::{FileStat, FileSystem},
    identity::CanonicalId,
};
use std::path::{Path, PathBuf};

/// An action the scheduler knows how to execute both synchronously and
/// asynchronously.
#[derive(Clone, Debug)]
pub enum Effect {
    /// Read a file; missing files are errors.
    FileRead(PathBuf),
    /// Read a file; missing files produce `None`.
    FileReadOptional(PathBuf),
    /// Stat a file; missing files are errors.
    FileStat(PathBuf),
    /// Stat a file; missing files produce `None`.
    FileStatOptional(PathBuf),
    /// Run one element's `define` closure.
    ElementEvaluation(CanonicalId),
    /// Execute the inner effects; the async scheduler may run them
    /// concurrently, the sync scheduler runs them in order.
    Parallel(Vec<Effect>),
}

/// The value an executed effect resumes its program with.
#[derive(Clone, Debug)]
pub enum EffectValue {
    Text(String),
    OptionalText(Option<String>),
    Stat(FileStat),
    OptionalStat(Option<FileStat>),
    Evaluated(Prebuild),
    Many(Vec<EffectValue>),
}

/// One step of a program: either an effect to perform or the final value.
pub enum ProgramStep<T> {
    Yield(Effect),
    Return(T),
}

/// A resumable effect state machine.
///
/// The first `resume` receives `None`; every later call receives the value of
/// the previously yielded effect.
pub trait EffectProgram {
    type Output;

    fn resume(&mut self, input: Option<EffectValue>) -> Result<ProgramStep<Self::Output>>;
}

/// Supplies element `define` execution to the schedulers.
pub trait ElementRuntime {
    fn evaluate_sync(&self, id: &CanonicalId) -> Result<Prebuild>;

    /// A future for the element's evaluation; sync defines resolve
    /// immediately.
    fn evaluate_deferred(&self, id: &CanonicalId) -> crate::evaluator::DefineFuture;
}

/// Capabilities the schedulers execute effects against.
#[derive(Clone, Copy)]
pub struct EffectContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub elements: Option<&'a dyn ElementRuntime>,
}

impl<'a> EffectContext<'a> {
    pub fn io_only(fs: &'a dyn FileSystem) -> Self {
        Self { fs, elements: None }
    }

    fn elements(&self) -> Result<&'a dyn ElementRuntime> {
        self.elements.ok_or_else(|| BuildError::msg("no element runtime attached to scheduler"))
    }
}

/// Blocking effect runner.
#[derive(Clone, Copy)]
pub struct SyncScheduler<'a> {
    ctx: EffectContext<'a>,
}

impl<'a> SyncScheduler<'a> {
    pub fn new(ctx: EffectContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn run<P: EffectProgram>(&self, mut program: P) -> Result<P::Output> {
        let mut input = None;
        loop {
            match program.resume(input.take())? {
                ProgramStep::Yield(effect) => input = Some(self.execute(&effect)?),
                ProgramStep::Return(value) => return Ok(value),
            }
        }
    }

    pub fn execute(&self, effect: &Effect) -> Result<EffectValue> {
        match effect {
            Effect::FileRead(path) => self
                .ctx
                .fs
                .read(path)
                .map(EffectValue::Text)
                .map_err(|err| BuildError::io(err, path)),
            Effect::FileReadOptional(path) => self
                .ctx
                .fs
                .read_optional(path)
                .map(EffectValue::OptionalText)
                .map_err(|err| BuildError::io(err, path)),
            Effect::FileStat(path) => self
                .ctx
                .fs
                .stat(path)
                .map(EffectValue::Stat)
                .map_err(|err| BuildError::io(err, path)),
            Effect::FileStatOptional(path) => self
                .ctx
                .fs
                .stat_optional(path)
                .map(EffectValue::OptionalStat)
                .map_err(|err| BuildError::io(err, path)),
            Effect::ElementEvaluation(id) => {
                self.ctx.elements()?.evaluate_sync(id).map(EffectValue::Evaluated)
            }
            Effect::Parallel(effects) => effects
                .iter()
                .map(|effect| self.execute(effect))
                .collect::<Result<Vec<_>>>()
                .map(EffectValue::Many),
        }
    }
}

/// Effect-backed file probes used by discovery, so all pipeline I/O funnels
/// through the scheduler.
pub struct EffectIo<'a> {
    scheduler: SyncScheduler<'a>,
}

impl<'a> EffectIo<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { scheduler: SyncScheduler::new(EffectContext::io_only(fs)) }
    }

    pub fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match self.scheduler.execute(&Effect::FileReadOptional(path.to_path_buf()))? {
            EffectValue::OptionalText(text) => Ok(text),
            _ => Err(BuildError::msg("file read produced an unexpected effect value")),
        }
    }

    pub fn stat_optional(&self, path: &Path) -> Result<Option<FileStat>> {
        match self.scheduler.execute(&Effect::FileStatOptional(path.to_path_buf()))? {
            EffectValue::OptionalStat(stat) => Ok(stat),
            _ => Err(BuildError::msg("file stat produced an unexpected effect value")),
        }
    }

    pub fn is_file(&self, path: &Path) -> bool {
        matches!(self.stat_optional(path), Ok(Some(stat)) if stat.is_file)
    }
}

#[cfg(feature = "async")]
pub use r#async::AsyncScheduler;

#[cfg(feature = "async")]
mod r#async {
    use super::*;
    use futures_util::future::{try_join_all, BoxFuture};

    /// Non-blocking effect runner. File effects go through `tokio::fs`;
    /// parallel nodes fan out with `try_join_all`.
    #[derive(Clone, Copy)]
    pub struct AsyncScheduler<'a> {
        ctx: EffectContext<'a>,
    }

    impl<'a> AsyncScheduler<'a> {
        pub fn new(ctx: EffectContext<'a>) -> Self {
            Self { ctx }
        }

        pub async fn run<P: EffectProgram>(&self, mut program: P) -> Result<P::Output> {
            let mut input = None;
            loop {
                match program.resume(input.take())? {
                    ProgramStep::Yield(effect) => input = Some(self.execute(&effect).await?),
                    ProgramStep::Return(value) => return Ok(value),
                }
            }
        }

        pub fn execute<'b>(&'b self, effect: &'b Effect) -> BoxFuture<'b, Result<EffectValue>> {
            Box::pin(async move {
                match effect {
                    Effect::FileRead(path) => tokio::fs::read_to_string(path)
                        .await
                        .map(EffectValue::Text)
                        .map_err(|err| BuildError::io(err, path)),
                    Effect::FileReadOptional(path) => {
                        match tokio::fs::read_to_string(path).await {
                            Ok(text) => Ok(EffectValue::OptionalText(Some(text))),
                            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                                Ok(EffectValue::OptionalText(None))
                            }
                            Err(err) => Err(BuildError::io(err, path)),
                        }
                    }
                    Effect::FileStat(path) => stat_async(path)
                        .await?
                        .map(EffectValue::Stat)
                        .ok_or_else(|| {
                            BuildError::io(
                                std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                                path,
                            )
                        }),
                    Effect::FileStatOptional(path) => {
                        Ok(EffectValue::OptionalStat(stat_async(path).await?))
                    }
                    Effect::ElementEvaluation(id) => self
                        .ctx
                        .elements()?
                        .evaluate_deferred(id)
                        .await
                        .map(EffectValue::Evaluated),
                    Effect::Parallel(effects) => {
                        let values =
                            try_join_all(effects.iter().map(|effect| self.execute(effect))).await?;
                        Ok(EffectValue::Many(values))
                    }
                }
            })
        }
    }

    async fn stat_async(path: &Path) -> Result<Option<FileStat>> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BuildError::io(err, path)),
        };
        let mtime_ms = metadata
            .modified()
            .map_err(|err| BuildError::io(err, path))?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Ok(Some(FileStat {
            mtime_ms,
            size_bytes: metadata.len(),
            is_file: metadata.is_file(),
        }))
    }
}
