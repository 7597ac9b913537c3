//! Canonical definition identities.
//!
//! Every discovered definition is addressed by a [`CanonicalId`], the nominal
//! string `<absolutePath>::<astPath>`. The path part is lexically normalized
//! on construction so that `createCanonicalId(normalize(p), a)` and
//! `createCanonicalId(p, a)` observe the same identity; on case-insensitive
//! filesystems comparison folds case while the display form keeps the
//! original casing.

use crate::{
    error::{BuildError, Result},
    utils,
};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    path::Path,
};

/// Separator between the path and the ast path.
pub const ID_SEPARATOR: &str = "::";

/// Separator between ast path segments. `#` is reserved for anonymous scope
/// disambiguation (`arrow#1`).
pub const AST_PATH_SEPARATOR: char = '.';

/// Globally unique identity of a single definition.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId {
    repr: String,
}

impl CanonicalId {
    /// Creates an id from an absolute file path and a dotted ast path.
    ///
    /// Rejects relative paths and resolves `.`/`..` segments lexically. The
    /// stored form uses forward slashes.
    pub fn new(path: impl AsRef<Path>, ast_path: impl AsRef<str>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(BuildError::NonAbsolutePath { path: path.to_path_buf() });
        }
        let normalized = utils::normalize_slashes(&utils::normalize_lexically(path));
        Ok(Self { repr: format!("{normalized}{ID_SEPARATOR}{}", ast_path.as_ref()) })
    }

    /// The full `<absolutePath>::<astPath>` wire form.
    pub fn as_str(&self) -> &str {
        &self.repr
    }

    /// The path half of the id.
    pub fn file_path(&self) -> &str {
        self.split().0
    }

    /// The dotted ast path half of the id.
    pub fn ast_path(&self) -> &str {
        self.split().1
    }

    /// Root segment of the ast path (the binding name of the definition).
    pub fn root_segment(&self) -> &str {
        let ast_path = self.ast_path();
        ast_path.split(AST_PATH_SEPARATOR).next().unwrap_or(ast_path)
    }

    /// Whether this id addresses a definition inside `file`.
    pub fn belongs_to(&self, file: &Path) -> bool {
        let normalized = utils::normalize_slashes(&utils::normalize_lexically(file));
        utils::comparison_key(self.file_path()) == utils::comparison_key(&normalized)
    }

    fn split(&self) -> (&str, &str) {
        // the separator is guaranteed present by construction
        match self.repr.rfind(ID_SEPARATOR) {
            Some(idx) => (&self.repr[..idx], &self.repr[idx + ID_SEPARATOR.len()..]),
            None => (&self.repr, ""),
        }
    }

    fn key(&self) -> String {
        let (path, ast_path) = self.split();
        format!("{}{ID_SEPARATOR}{ast_path}", utils::comparison_key(path))
    }
}

impl PartialEq for CanonicalId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CanonicalId {}

impl PartialOrd for CanonicalId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for CanonicalId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl fmt::Debug for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonicalId({})", self.repr)
    }
}
