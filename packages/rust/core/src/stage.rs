//! Pipeline stages and their per-run state table.

use std::fmt;

use serde::Serialize;
use swr_shared::{Result, SwrError};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Transcribe,
    Upload,
    Report,
    Cleanup,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Self::Fetch,
        Self::Transcribe,
        Self::Upload,
        Self::Report,
        Self::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Transcribe => "transcribe",
            Self::Upload => "upload",
            Self::Report => "report",
            Self::Cleanup => "cleanup",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage state.
///
/// Transitions:
/// - Pending -> Running -> Success
/// - Pending -> Running -> Failed
/// - Pending -> Skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One row of the stage table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    /// Failure message, set only when `status` is Failed.
    pub error: Option<String>,
}

/// Status of every stage of one run. Rejects illegal transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTable {
    records: [StageRecord; 5],
}

impl Default for StageTable {
    fn default() -> Self {
        Self {
            records: Stage::ALL.map(|stage| StageRecord {
                stage,
                status: StageStatus::Pending,
                error: None,
            }),
        }
    }
}

impl StageTable {
    pub fn status(&self, stage: Stage) -> StageStatus {
        self.records[stage.index()].status
    }

    pub fn record(&self, stage: Stage) -> &StageRecord {
        &self.records[stage.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageRecord> {
        self.records.iter()
    }

    pub fn start(&mut self, stage: Stage) -> Result<()> {
        self.transition(stage, StageStatus::Running, None)
    }

    pub fn skip(&mut self, stage: Stage) -> Result<()> {
        self.transition(stage, StageStatus::Skipped, None)
    }

    pub fn succeed(&mut self, stage: Stage) -> Result<()> {
        self.transition(stage, StageStatus::Success, None)
    }

    pub fn fail(&mut self, stage: Stage, error: impl Into<String>) -> Result<()> {
        self.transition(stage, StageStatus::Failed, Some(error.into()))
    }

    fn transition(&mut self, stage: Stage, next: StageStatus, error: Option<String>) -> Result<()> {
        let record = &mut self.records[stage.index()];
        if !record.status.can_transition_to(next) {
            return Err(SwrError::validation(format!(
                "illegal {stage} transition {} -> {next}",
                record.status
            )));
        }
        record.status = next;
        record.error = error;
        Ok(())
    }

    /// Every stage before Cleanup ended in Success or Skipped.
    pub fn succeeded(&self) -> bool {
        self.records
            .iter()
            .filter(|r| r.stage != Stage::Cleanup)
            .all(|r| matches!(r.status, StageStatus::Success | StageStatus::Skipped))
    }

    /// First failed stage, if any.
    pub fn first_failure(&self) -> Option<&StageRecord> {
        self.records
            .iter()
            .find(|r| r.status == StageStatus::Failed)
    }
}
