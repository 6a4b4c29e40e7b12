//! File registry
//!
//! The registry is the loader's record of the filesystem as last observed:
//! one [`TrackedFile`] per logical template name. It is the baseline that
//! incremental reload compares fresh walks against.
//!
//! Entries are never removed implicitly. A template file deleted on disk stays
//! registered until the next full walk calls [`FileRegistry::reset`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::debug;

use crate::error::{LoaderError, Result};

/// A template file known to the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Logical name: path relative to the root, `/`-separated
    pub name: String,
    /// Source path on disk
    pub path: PathBuf,
    /// Modification time observed when the file was last registered
    pub modified: SystemTime,
    /// Raw template text, kept only when source caching is enabled
    pub content: Option<String>,
}

impl TrackedFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            modified,
            content: None,
        }
    }

    /// Whether `modified` is exactly the timestamp recorded for this file
    pub fn is_current(&self, modified: SystemTime) -> bool {
        self.modified == modified
    }
}

/// Mapping from logical name to tracked file
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: HashMap<String, TrackedFile>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file discovered by a full walk
    ///
    /// A name that is already registered is a conflict: two accepted files
    /// resolved to the same logical name within one walk.
    pub fn register(&mut self, file: TrackedFile) -> Result<()> {
        debug!(name = %file.name, "FileRegistry::register: called");
        if self.files.contains_key(&file.name) {
            debug!(name = %file.name, "FileRegistry::register: conflict");
            return Err(LoaderError::Conflict { name: file.name });
        }
        self.files.insert(file.name.clone(), file);
        Ok(())
    }

    /// Insert or replace a file seen by an incremental reload
    ///
    /// Returns the previous record, if any.
    pub fn upsert(&mut self, file: TrackedFile) -> Option<TrackedFile> {
        debug!(name = %file.name, "FileRegistry::upsert: called");
        self.files.insert(file.name.clone(), file)
    }

    pub fn lookup(&self, name: &str) -> Option<&TrackedFile> {
        self.files.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut TrackedFile> {
        self.files.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Drop every entry ahead of a fresh full walk
    pub fn reset(&mut self) {
        debug!(count = self.files.len(), "FileRegistry::reset: called");
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registered logical names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TrackedFile)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }
}
