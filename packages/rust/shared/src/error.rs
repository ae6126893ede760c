//! Error types for Folio.
//!
//! Library crates use [`FolioError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Folio operations.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to the content backend.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A remote call exceeded its time bound.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Malformed JSON or an unexpected payload shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache backend error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad route pattern, invalid mutation, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FolioError>;

impl FolioError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether a page render can degrade around this error instead of failing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http { .. } | Self::Timeout(_) | Self::Parse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = FolioError::config("missing base_url");
        assert_eq!(err.to_string(), "config error: missing base_url");

        let err = FolioError::Http {
            status: 502,
            url: "https://cms.example.com/api/pages".into(),
        };
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn transient_classification() {
        assert!(FolioError::Network("reset".into()).is_transient());
        assert!(FolioError::Timeout(std::time::Duration::from_secs(5)).is_transient());
        assert!(FolioError::parse("bad json").is_transient());
        assert!(!FolioError::config("no base url").is_transient());
        assert!(!FolioError::Cache("locked".into()).is_transient());
    }
}
