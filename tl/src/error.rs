//! Loader error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while discovering, parsing or rendering templates
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("template '{name}' existed")]
    Conflict { name: String },

    #[error("failed to walk '{}': {source}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_default())]
    Traversal {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to get relative path for '{path}'")]
    RelativePath { path: PathBuf },

    #[error("failed to read template file '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    #[error("failed to render template '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: Box<handlebars::RenderError>,
    },

    #[error("{0}")]
    Precondition(String),
}

impl LoaderError {
    /// Check if this error aborted a walk because two files share a logical name
    pub fn is_conflict(&self) -> bool {
        matches!(self, LoaderError::Conflict { .. })
    }

    /// Check if this error came from the template engine rejecting a source
    pub fn is_parse(&self) -> bool {
        matches!(self, LoaderError::Parse { .. })
    }

    /// Logical name of the template involved, when there is one
    pub fn template_name(&self) -> Option<&str> {
        match self {
            LoaderError::Conflict { name } | LoaderError::Parse { name, .. } | LoaderError::Render { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, LoaderError>;
