//! Filesystem capability consumed by discovery and the effect schedulers.

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::Path,
    time::UNIX_EPOCH,
};

/// Subset of file metadata the pipeline needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub mtime_ms: u64,
    pub size_bytes: u64,
    pub is_file: bool,
}

/// Read access used by the pipeline. Implementations must be deterministic
/// between mutations; discovery assumes a stat followed by a read observes
/// the same file version in the common case.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// `Ok(None)` when the file does not exist.
    fn read_optional(&self, path: &Path) -> io::Result<Option<String>> {
        match self.read(path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// `Ok(None)` when the file does not exist.
    fn stat_optional(&self, path: &Path) -> io::Result<Option<FileStat>> {
        match self.stat(path) {
            Ok(stat) => Ok(Some(stat)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Existence probe used by relative-import resolution.
    fn is_file(&self, path: &Path) -> bool {
        matches!(self.stat(path), Ok(stat) if stat.is_file)
    }
}

/// The real filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = fs::metadata(path)?;
        let mtime_ms = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
            .as_millis() as u64;
        Ok(FileStat { mtime_ms, size_bytes: metadata.len(), is_file: metadata.is_file() })
    }
}
