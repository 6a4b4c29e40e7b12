//! tplreload - Handlebars template directory loader with incremental reload
//!
//! Discovers every file under a root directory whose extension matches the
//! configured one, parses each into a Handlebars template named after its path
//! relative to the root, and re-parses only new or modified files on reload.
//!
//! # Modules
//!
//! - [`registry`] - Tracked files keyed by logical name
//! - [`scan`] - Full and incremental classification of walked entries
//! - [`source`] - Directory walk and file read capability
//! - [`loader`] - The loader tying registry, scan and template set together
//! - [`helpers`] - Built-in template helpers
//! - [`watcher`] - Polling reload loop
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use tplreload::TemplateLoader;
//!
//! let loader = TemplateLoader::new("templates");
//! loader.load()?;
//! let html = loader.render("pages/index.html", &serde_json::json!({"title": "Home"}))?;
//!
//! // after editing pages/index.html
//! let summary = loader.reload()?;
//! assert_eq!(summary.updated, vec!["pages/index.html"]);
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod helpers;
pub mod loader;
pub mod registry;
pub mod scan;
pub mod source;
pub mod watcher;

pub use config::LoaderConfig;
pub use error::{LoaderError, Result};
pub use helpers::{HelperMap, builtin_helpers};
pub use loader::{ReloadSummary, TemplateLoader};
pub use registry::{FileRegistry, TrackedFile};
pub use scan::{ScanMode, Verdict};
pub use source::{FsSource, SourceEntry, TemplateSource, WalkError};
pub use watcher::ReloadWatcher;

/// Template extension used when none is configured
pub const DEFAULT_EXTENSION: &str = ".html";
