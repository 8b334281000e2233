//! Error types for FragmentSync.
//!
//! Library crates use [`FragmentSyncError`] via `thiserror`.
//! App crates (cli/tui) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all FragmentSync operations.
#[derive(Debug, thiserror::Error)]
pub enum FragmentSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching fragments or scanning assets.
    #[error("network error: {0}")]
    Network(String),

    /// A fragment could not be rewritten (malformed markup).
    #[error("processing error in {component}: {message}")]
    Processing { component: String, message: String },

    /// Local state store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad override, invalid JSON, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A component name that is not declared in the configuration.
    #[error("unknown component: {0}")]
    UnknownComponent(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FragmentSyncError>;

impl FragmentSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a processing error for a component.
    pub fn processing(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Processing {
            component: component.into(),
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
}
