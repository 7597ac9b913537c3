//! The analyzer capability.
//!
//! An [`AstAnalyzer`] parses one source file and reports its imports,
//! exports, GraphQL definitions and diagnostics as a [`ModuleAnalysis`].
//! Backends are interchangeable: for the same input bytes every backend must
//! produce identical `astPath` strings and the same diagnostic taxonomy, a
//! contract enforced by the shared conformance corpus under `tests/`.

use crate::{error::Result, identity::CanonicalId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod swc;
pub use swc::SwcAnalyzer;

/// Input to [`AstAnalyzer::analyze`]. `file_path` must be absolute.
#[derive(Clone, Debug)]
pub struct AnalyzerInput<'a> {
    pub file_path: &'a Path,
    pub source: &'a str,
}

/// Parses source files into [`ModuleAnalysis`] records.
///
/// Implementations are pure: no side effects beyond diagnostics, and
/// deterministic output for identical bytes.
pub trait AstAnalyzer: Send + Sync {
    /// Stable backend identifier, part of the cache key. Bumping it
    /// invalidates every cached snapshot produced by this backend.
    fn analyzer_id(&self) -> &'static str;

    fn analyze(&self, input: AnalyzerInput<'_>) -> Result<ModuleAnalysis>;
}

/// Recognition options for the GraphQL helper binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Module specifiers that expose the helper (e.g. `@gql/runtime`).
    pub runtime_modules: Vec<String>,
    /// The helper's exported name.
    pub helper_name: String,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self { runtime_modules: vec!["@gql/runtime".to_string()], helper_name: "gql".to_string() }
    }
}

/// Result of analyzing a single file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAnalysis {
    pub file_path: PathBuf,
    /// Content hash of the analyzed source bytes.
    pub signature: String,
    pub definitions: Vec<ModuleDefinition>,
    pub imports: Vec<ModuleImport>,
    pub exports: Vec<ModuleExport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ModuleAnalysis {
    /// An analysis with no content, used for resolved-but-unparsed files
    /// (plain `.js` fallbacks).
    pub fn empty(file_path: PathBuf, signature: String) -> Self {
        Self {
            file_path,
            signature,
            definitions: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Whether the module declares any GraphQL definitions. Consulted by the
    /// evaluator's circular-import relaxation.
    pub fn has_definitions(&self) -> bool {
        !self.definitions.is_empty()
    }

    /// All import specifiers plus re-export sources, in declaration order,
    /// deduplicated.
    pub fn dependency_specifiers(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        let mut specifiers = Vec::new();
        for import in &self.imports {
            if seen.insert(import.source.as_str()) {
                specifiers.push(import.source.as_str());
            }
        }
        for export in &self.exports {
            if let ModuleExport::Reexport { source, .. } = export {
                if seen.insert(source.as_str()) {
                    specifiers.push(source.as_str());
                }
            }
        }
        specifiers
    }
}

/// How a binding is imported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportKind {
    Named,
    Namespace,
    Default,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleImport {
    /// The module specifier as written (`./fragments`, `react`).
    pub source: String,
    /// Local binding name.
    pub local: String,
    pub kind: ImportKind,
    pub is_type_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ModuleExport {
    Named {
        exported: String,
        local: String,
        is_type_only: bool,
    },
    Reexport {
        exported: String,
        local: Option<String>,
        source: String,
        is_type_only: bool,
    },
}

/// One GraphQL definition found in a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    pub canonical_id: CanonicalId,
    /// Dotted naming path inside the file (`models.user`, `make.arrow#1.q`).
    pub ast_path: String,
    /// Defined outside any function or method body.
    pub is_top_level: bool,
    pub is_exported: bool,
    /// Exported name of the root binding, when the binding is exported.
    pub export_binding: Option<String>,
    /// Full source text of the recognized helper call.
    pub expression: String,
}

/// Byte span plus 1-indexed line/column of its start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
}

/// The fixed diagnostic taxonomy both backends must emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// `import { gql as g } from "@gql/runtime"`.
    RenamedHelperImport,
    /// `import gql from "@gql/runtime"`.
    DefaultHelperImport,
    /// `import * as runtime from "@gql/runtime"`.
    StarHelperImport,
    /// `gql.query()` with no argument.
    MissingArgument,
    /// Primitive literal where a definition body was expected.
    WrongArgumentType,
    /// `gql.query(...spread)`.
    SpreadArgument,
    /// `gql(...)` without a member access.
    NonMemberCall,
    /// `gql["query"](...)`.
    ComputedCallee,
    /// `gql?.query(...)`.
    OptionalChainedCallee,
    /// The helper reached through an expression that cannot be tracked.
    DynamicCallee,
    /// A definition call inside a class property.
    ClassPropertyDefinition,
    /// More than one argument; the first is kept.
    ExtraArguments,
    /// The source failed to parse.
    ParseError,
}

impl DiagnosticKind {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::RenamedHelperImport
            | DiagnosticKind::DefaultHelperImport
            | DiagnosticKind::StarHelperImport
            | DiagnosticKind::ClassPropertyDefinition
            | DiagnosticKind::ExtraArguments => Severity::Warning,
            DiagnosticKind::MissingArgument
            | DiagnosticKind::WrongArgumentType
            | DiagnosticKind::SpreadArgument
            | DiagnosticKind::NonMemberCall
            | DiagnosticKind::ComputedCallee
            | DiagnosticKind::OptionalChainedCallee
            | DiagnosticKind::DynamicCallee
            | DiagnosticKind::ParseError => Severity::Error,
        }
    }
}

/// Informational finding attached to an analysis. Diagnostics never abort a
/// build; surfacing them is the caller's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub location: SourceLocation,
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

/// Maps byte offsets to 1-indexed line/column pairs.
#[derive(Clone, Debug)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        Self { line_starts }
    }

    /// 1-indexed `(line, column)` of a byte offset; columns count bytes.
    pub fn position(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let column = offset - self.line_starts[line];
        (line as u32 + 1, column as u32 + 1)
    }

    pub fn location(&self, start: usize, end: usize) -> SourceLocation {
        let (line, column) = self.position(start);
        SourceLocation { start, end, line, column }
    }
}
