//! Error types emitted by the builder pipeline.

use crate::identity::CanonicalId;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// An `io::Error` paired with the path that produced it.
#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct IoErrorWithPath {
    io: io::Error,
    path: PathBuf,
}

impl IoErrorWithPath {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn io_error(&self) -> &io::Error {
        &self.io
    }
}

impl From<IoErrorWithPath> for io::Error {
    fn from(err: IoErrorWithPath) -> Self {
        err.io
    }
}

/// Failures surfaced by a builder session.
///
/// All stages return these as values; a single error aborts the current build
/// and leaves the session's last artifact untouched.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An entry path handed to the session does not exist.
    #[error("entrypoint not found: \"{}\"", .path.display())]
    EntryNotFound { path: PathBuf },

    /// Reading a discovered file failed with something other than "not found".
    #[error("io error while scanning \"{}\": {message}", .path.display())]
    DiscoveryIo { path: PathBuf, message: String },

    /// A non-external import could not be resolved inside the snapshot set.
    #[error("unresolved import \"{specifier}\" in \"{}\"", .importing_file.display())]
    MissingImport { importing_file: PathBuf, specifier: String },

    /// A module cycle where both endpoints declare GraphQL definitions.
    #[error("circular dependency: {}", display_chain(.chain))]
    CircularDependency { chain: Vec<PathBuf> },

    /// A generator requested a module the registry does not know.
    #[error("module not found in registry: \"{}\"", .path.display())]
    ModuleNotFound { path: PathBuf },

    /// An element `define` closure failed (or required an unavailable mode).
    #[error("evaluation failed{}: {message}", evaluation_subject(.canonical_id, .file_path))]
    Evaluation {
        canonical_id: Option<CanonicalId>,
        file_path: Option<PathBuf>,
        message: String,
    },

    /// Two elements were registered under the same canonical id.
    #[error("element already registered: {id}")]
    AlreadyRegistered { id: CanonicalId },

    /// A declared definition had no evaluated element to pair with.
    #[error("no evaluated element for definition: {id}")]
    MissingRuntimeElement { id: CanonicalId },

    /// `CanonicalId` inputs must be absolute.
    #[error("canonical ids require absolute paths, got \"{}\"", .path.display())]
    NonAbsolutePath { path: PathBuf },

    /// Two definitions in one file produced the same naming path.
    #[error("duplicate definition path \"{ast_path}\" in \"{}\"", .file_path.display())]
    DuplicateDefinitionPath { file_path: PathBuf, ast_path: String },

    #[error(transparent)]
    Io(#[from] IoErrorWithPath),

    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl BuildError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        IoErrorWithPath::new(err, path).into()
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        BuildError::Message(msg.to_string())
    }

    pub fn evaluation(id: Option<CanonicalId>, message: impl std::fmt::Display) -> Self {
        BuildError::Evaluation { canonical_id: id, file_path: None, message: message.to_string() }
    }

    /// Stable machine-readable code for the session-surfaced taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            BuildError::DiscoveryIo { .. } => "DISCOVERY_IO_ERROR",
            BuildError::MissingImport { .. } => "MISSING_IMPORT",
            BuildError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            BuildError::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            BuildError::Evaluation { .. } => "EVALUATION_FAILED",
            BuildError::AlreadyRegistered { .. } => "ARTIFACT_ALREADY_REGISTERED",
            BuildError::MissingRuntimeElement { .. } => "ARTIFACT_NOT_FOUND_IN_RUNTIME_MODULE",
            BuildError::NonAbsolutePath { .. } => "NON_ABSOLUTE_PATH",
            BuildError::DuplicateDefinitionPath { .. } => "DUPLICATE_DEFINITION_PATH",
            BuildError::Io(_) => "IO_ERROR",
            BuildError::Json(_) => "JSON_ERROR",
            BuildError::Message(_) => "ERROR",
        }
    }
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" -> ")
}

fn evaluation_subject(id: &Option<CanonicalId>, file: &Option<PathBuf>) -> String {
    match (id, file) {
        (Some(id), _) => format!(" for {id}"),
        (None, Some(file)) => format!(" in \"{}\"", file.display()),
        (None, None) => String::new(),
    }
}
