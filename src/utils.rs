//! Utility functions

use crate::error::{BuildError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    path::{Component, Path, PathBuf},
};

/// Resolves `.` and `..` components lexically, without touching the
/// filesystem.
///
/// `/a/b/../c.ts` becomes `/a/c.ts`. `..` at the root is dropped. Symlinks are
/// deliberately not resolved; two paths compare equal only if they are the
/// same lexical identity.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    normalized.pop();
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Converts all `\\` separators to `/`.
///
/// Snapshots store this form so cache entries compare equal across platforms.
pub fn normalize_slashes(path: &Path) -> String {
    use path_slash::PathExt;
    path.to_slash_lossy().into_owned()
}

/// Key used when comparing file identities.
///
/// On case-insensitive filesystems the comparison is case-folded; the
/// original casing is preserved everywhere a path is displayed or stored.
pub fn comparison_key(path: &str) -> String {
    cfg_if::cfg_if! {
        if #[cfg(any(windows, target_os = "macos"))] {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }
}

/// Returns the canonical display form of `path`.
///
/// Uses `dunce` so Windows paths are not rendered as `\\?\` UNC paths. Falls
/// back to the lexically normalized input when the file does not exist yet.
pub fn canonical_display(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path))
}

/// Reads and deserializes a json file.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|err| BuildError::io(err, path))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Serializes `value` and writes it to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    create_parent_dir_all(path)?;
    let file = fs::File::create(path).map_err(|err| BuildError::io(err, path))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|err| BuildError::io(err, path))?;
    Ok(())
}

/// Creates the parent directory of `file` and all its ancestors.
pub fn create_parent_dir_all(file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| BuildError::io(err, parent))?;
    }
    Ok(())
}
