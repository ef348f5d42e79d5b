//! Template types and error definitions

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Template root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template not found: {0}")]
    NotFound(String),

    /// The name resolves outside the template root. Kept apart from
    /// `NotFound` so sandbox violations can be audited.
    #[error("Template path escapes the template root: {0}")]
    PathEscape(String),

    #[error("Template syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Template execution failed: {0}")]
    Execution(String),
}

impl TemplateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A request or auto-response template read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Path relative to the store root, `/`-separated
    pub name: String,

    /// Raw template text
    pub content: String,
}

/// Values available to a template while it is rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// Exposed as `.Now`
    pub now: DateTime<Utc>,

    /// Exposed as `.ClientRef`
    pub client_ref: String,
}

impl RenderContext {
    pub fn new(now: DateTime<Utc>, client_ref: impl Into<String>) -> Self {
        Self {
            now,
            client_ref: client_ref.into(),
        }
    }
}
