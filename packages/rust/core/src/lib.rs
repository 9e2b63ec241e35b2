//! Pipeline orchestration and domain logic for SWR.
//!
//! Ties the feed, transcription, notebook, and mail collaborators into the
//! weekly run, and hosts the schedule, retention, and service layers the
//! CLI and the MCP server drive.

pub mod mail;
pub mod mcp;
pub mod pipeline;
pub mod report;
pub mod retention;
pub mod runner;
pub mod schedule;
pub mod service;
pub mod stage;
pub mod transcribe;

pub use pipeline::{
    Pipeline, ProgressReporter, RunOptions, RunResult, SilentProgress, StageContext, StageRunner,
};
pub use runner::ExternalRunner;
pub use service::{RunRequest, Service};
pub use stage::{Stage, StageStatus, StageTable};
