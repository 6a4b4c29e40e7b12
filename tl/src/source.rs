//! Template sources
//!
//! A [`TemplateSource`] supplies the two filesystem capabilities the loader
//! needs: a directory walk reporting each entry's path, directory flag and
//! modification time, and a way to read a file's text. [`FsSource`] is the
//! real implementation over `walkdir` and `std::fs`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// One filesystem entry observed during a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Absolute (or root-joined) path of the entry
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Last modification time as reported by the filesystem
    pub modified: SystemTime,
}

impl SourceEntry {
    pub fn file(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            modified,
        }
    }

    pub fn dir(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            modified,
        }
    }
}

/// A per-entry error reported by the walk
#[derive(Debug, Error)]
#[error("{source}")]
pub struct WalkError {
    /// Path of the entry that failed, if known
    pub path: Option<PathBuf>,
    #[source]
    pub source: io::Error,
}

impl From<walkdir::Error> for WalkError {
    fn from(err: walkdir::Error) -> Self {
        Self {
            path: err.path().map(Path::to_path_buf),
            source: io::Error::from(err),
        }
    }
}

/// Stream of walk results
pub type WalkIter<'a> = Box<dyn Iterator<Item = Result<SourceEntry, WalkError>> + 'a>;

/// Directory-walk and file-read capability used by the loader
pub trait TemplateSource: Send + Sync {
    /// Walk every entry under `root`, including `root` itself
    fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a>;

    /// Read the full text of a template file
    fn read(&self, path: &Path) -> io::Result<String>;
}

impl<S: TemplateSource + ?Sized> TemplateSource for Arc<S> {
    fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a> {
        (**self).walk(root)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        (**self).read(path)
    }
}

/// [`TemplateSource`] backed by the real filesystem
#[derive(Debug, Clone, Default)]
pub struct FsSource;

impl FsSource {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateSource for FsSource {
    fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a> {
        debug!(?root, "FsSource::walk: called");
        let walker = WalkDir::new(root).follow_links(false).sort_by_file_name().into_iter();
        Box::new(walker.map(|entry| {
            let entry = entry?;
            let metadata = entry.metadata()?;
            let modified = metadata.modified().map_err(|source| WalkError {
                path: Some(entry.path().to_path_buf()),
                source,
            })?;
            Ok(SourceEntry {
                path: entry.path().to_path_buf(),
                is_dir: entry.file_type().is_dir(),
                modified,
            })
        }))
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        debug!(?path, "FsSource::read: called");
        fs::read_to_string(path)
    }
}
