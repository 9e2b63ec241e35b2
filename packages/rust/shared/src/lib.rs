//! Shared types, error model, and configuration for SWR.
//!
//! This crate is the foundation depended on by all other SWR crates.
//! It provides:
//! - [`SwrError`], the unified error type
//! - Domain types ([`FolderId`], [`ArtifactCategory`], [`ArtifactRoots`])
//! - Configuration ([`Config`]) and its persistent [`ConfigStore`]
//! - [`RetryPolicy`] for collaborator calls

pub mod config;
pub mod error;
pub mod retry;
pub mod store;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppPaths, Config, EmailConfig, Feed, REDACTED, ReportSection, RetentionConfig, RetryConfig,
    SMTP_PASSWORD_ENV, config_dir, default_config_path, expand_home, is_valid_email,
    validate_feed_url,
};
pub use error::{ErrorKind, Result, SwrError};
pub use retry::RetryPolicy;
pub use store::{ConfigStore, DEFAULT_LOCK_TIMEOUT};
pub use types::{ArtifactCategory, ArtifactRoots, FolderId};
