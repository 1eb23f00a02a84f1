//! Error types for DocAssembler.
//!
//! Library crates use [`DocAssemblerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Non-fatal extraction problems are not errors: they are recorded as
//! [`ParseIssue`](crate::ParseIssue) values on the document.

use std::path::PathBuf;

/// Top-level error type for all DocAssembler operations.
#[derive(Debug, thiserror::Error)]
pub enum DocAssemblerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed or missing provider specification element.
    /// Fatal to the provider being loaded, never to other providers.
    #[error("specification error: {message}")]
    Spec { message: String },

    /// Transport failure other than "not found".
    #[error("network error: {0}")]
    Network(String),

    /// The origin reported that the resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Extraction of a document was aborted.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A selector or path expression could not be compiled.
    #[error("selector error in `{expression}`: {message}")]
    Selector { expression: String, message: String },

    /// Catalog identity or lifecycle violation.
    #[error("catalog error: {message}")]
    Catalog { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Document sink failure.
    #[error("render error: {0}")]
    Render(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input file, invalid plan, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocAssemblerError>;

impl DocAssemblerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a specification error.
    pub fn spec(msg: impl Into<String>) -> Self {
        Self::Spec {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a selector compilation error.
    pub fn selector(expression: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Selector {
            expression: expression.into(),
            message: msg.into(),
        }
    }

    /// Create a catalog error.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the resource no longer exists upstream.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocAssemblerError::config("missing output directory");
        assert_eq!(err.to_string(), "config error: missing output directory");

        let err = DocAssemblerError::selector("//a[", "unclosed predicate");
        assert!(err.to_string().contains("//a["));
        assert!(err.to_string().contains("unclosed predicate"));
    }

    #[test]
    fn not_found_is_distinct() {
        assert!(DocAssemblerError::NotFound("https://x.test/a".into()).is_not_found());
        assert!(!DocAssemblerError::Network("reset".into()).is_not_found());
    }
}
