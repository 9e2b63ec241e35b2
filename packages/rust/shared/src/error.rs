//! Error types for SWR.
//!
//! Library crates use [`SwrError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all SWR operations.
#[derive(Debug, thiserror::Error)]
pub enum SwrError {
    /// Configuration could not be parsed, serialized, or located.
    #[error("config error: {message}")]
    Config { message: String },

    /// No config file exists yet.
    #[error("config file not found at {path:?}; run `swr init` first")]
    ConfigMissing { path: PathBuf },

    /// Another process held the config lock for too long.
    #[error("timed out after {waited:?} waiting for config lock {path:?}")]
    ConfigLockTimeout { path: PathBuf, waited: Duration },

    /// Dotted key does not name a settable field of the schema.
    #[error("invalid config key '{key}'")]
    InvalidKey { key: String },

    /// Value failed type, range, or format checks.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Adding a feed or receiver that is already present.
    #[error("{kind} '{value}' already exists")]
    DuplicateEntry { kind: &'static str, value: String },

    /// Removing or looking up a feed/receiver/report that is absent.
    #[error("{kind} '{value}' not found")]
    NotFound { kind: &'static str, value: String },

    /// A pipeline stage's collaborator failed.
    #[error("{stage} stage failed: {message}")]
    Stage { stage: String, message: String },

    /// The system scheduler is missing or rejected the write.
    #[error("scheduler unavailable: {0}")]
    ScheduleUnavailable(String),

    /// Network/HTTP error talking to a feed or download host.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Coarse error taxonomy used for exit handling and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Validation,
    Stage,
    Schedule,
    FileSystem,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SwrError>;

impl SwrError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a stage error for the named stage.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
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

    /// Which bucket of the error taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } | Self::ConfigMissing { .. } | Self::ConfigLockTimeout { .. } => {
                ErrorKind::Config
            }
            Self::InvalidKey { .. }
            | Self::Validation { .. }
            | Self::DuplicateEntry { .. }
            | Self::NotFound { .. } => ErrorKind::Validation,
            Self::Stage { .. } | Self::Network(_) => ErrorKind::Stage,
            Self::ScheduleUnavailable(_) => ErrorKind::Schedule,
            Self::Io { .. } => ErrorKind::FileSystem,
        }
    }
}
