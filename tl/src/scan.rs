//! Scan classification
//!
//! Both the full walk and the incremental reload run every walked entry
//! through the same [`classify`] predicate. The [`ScanMode`] decides how an
//! entry that collides with the registry, or a walk error, is treated:
//!
//! | entry                          | `Full`             | `Incremental`          |
//! |--------------------------------|--------------------|------------------------|
//! | walk error                     | abort (Traversal)  | skip                   |
//! | directory / other extension    | skip               | skip                   |
//! | name not registered            | accept             | accept (new)           |
//! | name registered, same mtime    | abort (Conflict)   | unchanged              |
//! | name registered, other mtime   | abort (Conflict)   | accept (changed)       |

use std::path::{Component, Path};

use tracing::{debug, warn};

use crate::error::{LoaderError, Result};
use crate::registry::{FileRegistry, TrackedFile};
use crate::source::{SourceEntry, WalkError};

/// How a scan treats collisions and walk errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Rebuild the registry from scratch; duplicates and walk errors are fatal
    Full,
    /// Diff against the existing registry; walk errors are skipped
    Incremental,
}

/// Outcome of classifying a single walked entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Not a template, or an unreadable entry during an incremental scan
    Skip,
    /// Registered with an identical modification time
    Unchanged,
    /// New or modified template that must be (re)parsed
    Accept(TrackedFile),
}

/// Extension of the final path component, starting at its last `.`
///
/// Returns an empty string when the file name has no dot.
pub fn extension_of(path: &Path) -> &str {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return "";
    };
    match name.rfind('.') {
        Some(idx) => &name[idx..],
        None => "",
    }
}

/// Logical template name of `path`: its path relative to `root`, `/`-joined
///
/// Every component below `root` must be valid UTF-8.
pub fn logical_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| LoaderError::RelativePath {
        path: path.to_path_buf(),
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => {
                    return Err(LoaderError::RelativePath {
                        path: path.to_path_buf(),
                    });
                }
            },
            Component::CurDir => {}
            _ => {
                return Err(LoaderError::RelativePath {
                    path: path.to_path_buf(),
                });
            }
        }
    }

    if parts.is_empty() {
        return Err(LoaderError::RelativePath {
            path: path.to_path_buf(),
        });
    }
    Ok(parts.join("/"))
}

/// Classify one walked entry against the registry
pub fn classify(
    mode: ScanMode,
    entry: std::result::Result<SourceEntry, WalkError>,
    root: &Path,
    extension: &str,
    registry: &FileRegistry,
) -> Result<Verdict> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(err) => match mode {
            ScanMode::Full => {
                debug!(path = ?err.path, error = %err, "classify: walk error aborts full scan");
                return Err(LoaderError::Traversal {
                    path: err.path,
                    source: err.source,
                });
            }
            ScanMode::Incremental => {
                warn!(path = ?err.path, error = %err, "Skipping unreadable entry during reload");
                return Ok(Verdict::Skip);
            }
        },
    };

    if entry.is_dir || extension_of(&entry.path) != extension {
        return Ok(Verdict::Skip);
    }

    let name = logical_name(root, &entry.path)?;

    match (mode, registry.lookup(&name)) {
        (ScanMode::Full, Some(_)) => {
            debug!(%name, "classify: duplicate logical name");
            Err(LoaderError::Conflict { name })
        }
        (ScanMode::Incremental, Some(existing)) if existing.is_current(entry.modified) => {
            debug!(%name, "classify: unchanged");
            Ok(Verdict::Unchanged)
        }
        (_, existing) => {
            debug!(%name, known = existing.is_some(), "classify: accepted");
            Ok(Verdict::Accept(TrackedFile::new(name, entry.path, entry.modified)))
        }
    }
}

/// Build a fresh registry from a full walk
///
/// Stops at the first walk error or duplicate name.
pub fn full_scan<I>(entries: I, root: &Path, extension: &str) -> Result<FileRegistry>
where
    I: IntoIterator<Item = std::result::Result<SourceEntry, WalkError>>,
{
    debug!(?root, %extension, "full_scan: called");
    let mut registry = FileRegistry::new();
    for entry in entries {
        if let Verdict::Accept(file) = classify(ScanMode::Full, entry, root, extension, &registry)? {
            registry.register(file)?;
        }
    }
    debug!(count = registry.len(), "full_scan: complete");
    Ok(registry)
}

/// Collect the new and modified templates relative to `registry`
pub fn incremental_scan<I>(entries: I, root: &Path, extension: &str, registry: &FileRegistry) -> Result<Vec<TrackedFile>>
where
    I: IntoIterator<Item = std::result::Result<SourceEntry, WalkError>>,
{
    debug!(?root, %extension, known = registry.len(), "incremental_scan: called");
    let mut changed = Vec::new();
    for entry in entries {
        if let Verdict::Accept(file) = classify(ScanMode::Incremental, entry, root, extension, registry)? {
            changed.push(file);
        }
    }
    changed.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(count = changed.len(), "incremental_scan: complete");
    Ok(changed)
}
