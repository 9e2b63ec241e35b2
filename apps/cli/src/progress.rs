//! Spinner-based pipeline progress for interactive runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use swr_core::{ProgressReporter, RunResult, Stage, StageStatus};

/// CLI progress reporter using an indicatif spinner.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

fn marker(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "✓",
        StageStatus::Failed => "✗",
        StageStatus::Skipped => "-",
        StageStatus::Pending | StageStatus::Running => " ",
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!("{stage}..."));
    }

    fn stage_finished(&self, stage: Stage, status: StageStatus) {
        self.spinner
            .println(format!("  {} {:<11} {status}", marker(status), stage.as_str()));
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}
