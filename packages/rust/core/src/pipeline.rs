//! Weekly pipeline: fetch → transcribe → upload → report/email → cleanup.
//!
//! Stages run one after another. Each goes through the [`StageTable`], so
//! every skip/resume/reuse combination ends in a well-defined stage map.

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use swr_shared::{ArtifactCategory, ArtifactRoots, Config, FolderId, Result, SwrError};

use crate::report::{self, Report};
use crate::retention::{self, CleanupReport};
use crate::stage::{Stage, StageStatus, StageTable};

// ---------------------------------------------------------------------------
// Options & result
// ---------------------------------------------------------------------------

/// Per-run controls. Every flag is independent.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub skip_fetch: bool,
    pub skip_transcribe: bool,
    pub skip_upload: bool,
    /// Skip the whole Report stage.
    pub skip_email: bool,
    pub skip_cleanup: bool,
    /// Generate and save the report, but do not mail it.
    pub save_report_only: bool,
    /// Run folder (`YYYYMMDD-YYYYMMDD`); derived from today when absent.
    pub folder: Option<String>,
    /// Existing notebook to report from; forces Upload to Skipped.
    pub notebook_id: Option<String>,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    #[serde(serialize_with = "serialize_display")]
    pub folder_id: FolderId,
    pub stages: StageTable,
    pub notebook_id: Option<String>,
    pub report_path: Option<PathBuf>,
    /// Whether the report was handed to the mail collaborator.
    pub delivered: bool,
    pub cleanup: Option<CleanupReport>,
}

impl RunResult {
    fn new(folder_id: FolderId) -> Self {
        Self {
            folder_id,
            stages: StageTable::default(),
            notebook_id: None,
            report_path: None,
            delivered: false,
            cleanup: None,
        }
    }

    /// Every stage before Cleanup succeeded or was skipped.
    pub fn succeeded(&self) -> bool {
        self.stages.succeeded()
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Run {}", self.folder_id)];
        for record in self.stages.iter() {
            match &record.error {
                Some(error) => lines.push(format!(
                    "  {:<11} {} ({error})",
                    record.stage.as_str(),
                    record.status
                )),
                None => lines.push(format!("  {:<11} {}", record.stage.as_str(), record.status)),
            }
        }
        if let Some(id) = &self.notebook_id {
            lines.push(format!("Notebook: {id}"));
        }
        if let Some(path) = &self.report_path {
            lines.push(format!("Report:   {}", path.display()));
        }
        if let Some(cleanup) = &self.cleanup {
            lines.push(format!(
                "Cleanup:  {} deleted, {} kept, {} failed",
                cleanup.deleted.len(),
                cleanup.retained,
                cleanup.failures.len()
            ));
        }
        lines.push(format!(
            "Result:   {}",
            if self.succeeded() { "success" } else { "failed" }
        ));
        lines.join("\n")
    }
}

fn serialize_display<S: serde::Serializer>(value: &FolderId, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(value)
}

// ---------------------------------------------------------------------------
// Collaborator seam
// ---------------------------------------------------------------------------

/// What a stage needs to know about the run.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub config: &'a Config,
    pub folder: FolderId,
    pub roots: ArtifactRoots,
}

impl StageContext<'_> {
    pub fn dir(&self, category: ArtifactCategory) -> PathBuf {
        self.roots.folder(category, &self.folder)
    }
}

/// The work behind each content stage.
pub trait StageRunner: Send + Sync {
    fn fetch(&self, ctx: &StageContext<'_>) -> Result<()>;
    fn transcribe(&self, ctx: &StageContext<'_>) -> Result<()>;
    /// Upload transcripts and return the notebook id.
    fn upload(&self, ctx: &StageContext<'_>) -> Result<String>;
    fn generate_report(&self, ctx: &StageContext<'_>, notebook_id: &str) -> Result<Report>;
    fn deliver(&self, ctx: &StageContext<'_>, report: &Report) -> Result<()>;
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts running.
    fn stage_started(&self, stage: Stage);
    /// Called when a stage reaches a terminal state.
    fn stage_finished(&self, stage: Stage, status: StageStatus);
    /// Called when the run completes.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage, _status: StageStatus) {}
    fn done(&self, _result: &RunResult) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<'a, R: StageRunner + ?Sized> {
    config: &'a Config,
    runner: &'a R,
    progress: &'a dyn ProgressReporter,
    today: NaiveDate,
}

impl<'a, R: StageRunner + ?Sized> Pipeline<'a, R> {
    pub fn new(config: &'a Config, runner: &'a R) -> Self {
        Self {
            config,
            runner,
            progress: &SilentProgress,
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Fix "today" (UTC) for folder derivation and retention ages.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Folder for this run: the caller's, or the lookback window ending today.
    pub fn resolve_folder(&self, folder: Option<&str>) -> Result<FolderId> {
        match folder {
            Some(raw) => raw.parse(),
            None => Ok(FolderId::for_lookback(self.today, self.config.lookback_days)),
        }
    }

    /// Run every stage once.
    ///
    /// Errors are returned only for invalid options; stage failures are
    /// recorded in the result.
    #[instrument(skip_all)]
    pub fn run(&self, opts: &RunOptions) -> Result<RunResult> {
        let folder = self.resolve_folder(opts.folder.as_deref())?;
        let supplied_notebook = match opts.notebook_id.as_deref().map(str::trim) {
            Some("") => return Err(SwrError::validation("notebook id must not be empty")),
            other => other.map(str::to_string),
        };

        let ctx = StageContext {
            config: self.config,
            folder,
            roots: self.config.artifact_roots(),
        };
        let mut result = RunResult::new(folder);
        info!(folder = %folder, "starting pipeline run");

        let mut halted = false;

        // --- Fetch ---
        halted |= !self.step(&mut result.stages, Stage::Fetch, opts.skip_fetch, || {
            self.runner.fetch(&ctx)
        })?;

        // --- Transcribe ---
        if !halted {
            halted |= !self.step(&mut result.stages, Stage::Transcribe, opts.skip_transcribe, || {
                self.runner.transcribe(&ctx)
            })?;
        }

        // --- Upload ---
        let mut notebook_id = supplied_notebook.clone();
        if !halted {
            let skip = opts.skip_upload || supplied_notebook.is_some();
            let mut uploaded = None;
            halted |= !self.step(&mut result.stages, Stage::Upload, skip, || {
                let id = self.runner.upload(&ctx)?;
                report::record_notebook_id(&ctx.roots, &folder, &id)?;
                uploaded = Some(id);
                Ok(())
            })?;
            if uploaded.is_some() {
                notebook_id = uploaded;
            }
        }

        // --- Report ---
        if !halted {
            if notebook_id.is_none() && !opts.skip_email {
                notebook_id = report::recorded_notebook_id(&ctx.roots, &folder);
            }
            let mut saved = None;
            let mut delivered = false;
            halted |= !self.step(&mut result.stages, Stage::Report, opts.skip_email, || {
                let id = notebook_id.as_deref().ok_or_else(|| {
                    SwrError::stage(
                        "report",
                        format!("no notebook recorded for {folder}; pass --notebook-id or run the upload stage"),
                    )
                })?;
                let report = self.runner.generate_report(&ctx, id)?;
                saved = Some(report::save(&ctx.roots, &folder, &report)?);
                if opts.save_report_only {
                    info!("delivery suppressed (save-report-only)");
                } else {
                    self.runner.deliver(&ctx, &report)?;
                    delivered = true;
                }
                Ok(())
            })?;
            result.report_path = saved;
            result.delivered = delivered;
        }
        result.notebook_id = notebook_id;

        // --- Cleanup ---
        if opts.skip_cleanup {
            result.stages.skip(Stage::Cleanup)?;
            self.progress.stage_finished(Stage::Cleanup, StageStatus::Skipped);
        } else {
            result.stages.start(Stage::Cleanup)?;
            self.progress.stage_started(Stage::Cleanup);
            let cleanup = retention::clean(&self.config.retention, &ctx.roots, self.today);
            if cleanup.is_clean() {
                result.stages.succeed(Stage::Cleanup)?;
            } else {
                let msg = format!("{} deletion(s) failed", cleanup.failures.len());
                warn!(%msg, "cleanup incomplete");
                result.stages.fail(Stage::Cleanup, msg)?;
            }
            self.progress
                .stage_finished(Stage::Cleanup, result.stages.status(Stage::Cleanup));
            result.cleanup = Some(cleanup);
        }

        info!(
            folder = %folder,
            succeeded = result.succeeded(),
            notebook_id = ?result.notebook_id,
            "pipeline run finished"
        );
        self.progress.done(&result);
        Ok(result)
    }

    /// Skip or run one stage. Returns whether the pipeline may continue.
    fn step(
        &self,
        stages: &mut StageTable,
        stage: Stage,
        skip: bool,
        work: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        if skip {
            stages.skip(stage)?;
            info!(%stage, "stage skipped");
            self.progress.stage_finished(stage, StageStatus::Skipped);
            return Ok(true);
        }

        stages.start(stage)?;
        self.progress.stage_started(stage);
        info!(%stage, "stage started");

        let ok = match work() {
            Ok(()) => {
                stages.succeed(stage)?;
                info!(%stage, "stage succeeded");
                true
            }
            Err(e) => {
                warn!(%stage, error = %e, "stage failed");
                stages.fail(stage, e.to_string())?;
                false
            }
        };
        self.progress.stage_finished(stage, stages.status(stage));
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls; fails the stages it is told to fail.
    #[derive(Default)]
    struct FakeRunner {
        fail: Vec<Stage>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn failing(stage: Stage) -> Self {
            Self {
                fail: vec![stage],
                ..Self::default()
            }
        }

        fn record(&self, call: impl Into<String>, stage: Stage) -> Result<()> {
            self.calls.lock().expect("lock").push(call.into());
            if self.fail.contains(&stage) {
                Err(SwrError::stage(stage.as_str(), "collaborator failed"))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl StageRunner for FakeRunner {
        fn fetch(&self, _ctx: &StageContext<'_>) -> Result<()> {
            self.record("fetch", Stage::Fetch)
        }

        fn transcribe(&self, _ctx: &StageContext<'_>) -> Result<()> {
            self.record("transcribe", Stage::Transcribe)
        }

        fn upload(&self, _ctx: &StageContext<'_>) -> Result<String> {
            self.record("upload", Stage::Upload)?;
            Ok("nb-uploaded".into())
        }

        fn generate_report(&self, ctx: &StageContext<'_>, notebook_id: &str) -> Result<Report> {
            self.record(format!("report:{notebook_id}"), Stage::Report)?;
            Ok(Report {
                subject: report::subject("Weekly", &ctx.folder),
                body: report::body("summary", notebook_id),
            })
        }

        fn deliver(&self, _ctx: &StageContext<'_>, _report: &Report) -> Result<()> {
            self.calls.lock().expect("lock").push("deliver".into());
            Ok(())
        }
    }

    fn temp_config() -> (PathBuf, Config) {
        let dir = std::env::temp_dir().join(format!("swr-pipeline-test-{}", uuid::Uuid::now_v7()));
        let config = Config {
            parent_folder: dir.to_string_lossy().into_owned(),
            ..Config::default()
        };
        (dir, config)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 25).expect("date")
    }

    fn statuses(result: &RunResult) -> Vec<StageStatus> {
        result.stages.iter().map(|r| r.status).collect()
    }

    #[test]
    fn full_run_succeeds() {
        let (dir, config) = temp_config();
        let runner = FakeRunner::default();
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&RunOptions::default())
            .expect("run");

        assert_eq!(result.folder_id.to_string(), "20260218-20260225");
        assert!(result.succeeded());
        assert!(statuses(&result).iter().all(|s| *s == StageStatus::Success));
        assert_eq!(result.notebook_id.as_deref(), Some("nb-uploaded"));
        assert!(result.delivered);
        assert_eq!(
            runner.calls(),
            ["fetch", "transcribe", "upload", "report:nb-uploaded", "deliver"]
        );
        assert_eq!(
            report::recorded_notebook_id(&config.artifact_roots(), &result.folder_id).as_deref(),
            Some("nb-uploaded")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reuse_notebook_and_save_only() {
        let (dir, config) = temp_config();
        let runner = FakeRunner::default();
        let opts = RunOptions {
            skip_fetch: true,
            skip_transcribe: true,
            notebook_id: Some("X".into()),
            save_report_only: true,
            ..RunOptions::default()
        };
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&opts)
            .expect("run");

        assert_eq!(
            statuses(&result),
            [
                StageStatus::Skipped,
                StageStatus::Skipped,
                StageStatus::Skipped,
                StageStatus::Success,
                StageStatus::Success,
            ]
        );
        assert_eq!(result.notebook_id.as_deref(), Some("X"));
        assert!(!result.delivered);
        assert_eq!(runner.calls(), ["report:X"]);

        let path = result.report_path.clone().expect("report path");
        let body = std::fs::read_to_string(&path).expect("report on disk");
        assert!(body.contains("notebook/X"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn transcribe_failure_halts_content_stages_but_not_cleanup() {
        let (dir, config) = temp_config();
        let runner = FakeRunner::failing(Stage::Transcribe);
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&RunOptions::default())
            .expect("run");

        assert_eq!(
            statuses(&result),
            [
                StageStatus::Success,
                StageStatus::Failed,
                StageStatus::Pending,
                StageStatus::Pending,
                StageStatus::Success,
            ]
        );
        assert!(!result.succeeded());
        assert!(result.stages.record(Stage::Transcribe).error.is_some());
        assert_eq!(runner.calls(), ["fetch", "transcribe"]);
        assert!(result.summary().contains("failed"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn skipped_upload_reuses_recorded_notebook() {
        let (dir, config) = temp_config();
        let runner = FakeRunner::default();
        let folder: FolderId = "20260101-20260108".parse().expect("folder");
        report::record_notebook_id(&config.artifact_roots(), &folder, "nb-earlier").expect("record");

        let opts = RunOptions {
            skip_fetch: true,
            skip_transcribe: true,
            skip_upload: true,
            folder: Some(folder.to_string()),
            ..RunOptions::default()
        };
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&opts)
            .expect("run");

        assert!(result.succeeded());
        assert_eq!(result.folder_id, folder);
        assert_eq!(result.notebook_id.as_deref(), Some("nb-earlier"));
        assert_eq!(runner.calls(), ["report:nb-earlier", "deliver"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn skipped_upload_without_notebook_fails_report() {
        let (dir, config) = temp_config();
        let runner = FakeRunner::default();
        let opts = RunOptions {
            skip_fetch: true,
            skip_transcribe: true,
            skip_upload: true,
            ..RunOptions::default()
        };
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&opts)
            .expect("run");

        assert_eq!(result.stages.status(Stage::Report), StageStatus::Failed);
        assert!(!result.succeeded());
        assert!(runner.calls().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn skip_email_and_cleanup() {
        let (dir, config) = temp_config();
        let runner = FakeRunner::default();
        let opts = RunOptions {
            skip_email: true,
            skip_cleanup: true,
            ..RunOptions::default()
        };
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&opts)
            .expect("run");

        assert!(result.succeeded());
        assert_eq!(result.stages.status(Stage::Report), StageStatus::Skipped);
        assert_eq!(result.stages.status(Stage::Cleanup), StageStatus::Skipped);
        assert!(result.cleanup.is_none());
        assert!(result.report_path.is_none());
        assert_eq!(runner.calls(), ["fetch", "transcribe", "upload"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_folder_is_rejected_before_any_stage() {
        let (_dir, config) = temp_config();
        let runner = FakeRunner::default();
        let opts = RunOptions {
            folder: Some("last-week".into()),
            ..RunOptions::default()
        };
        let err = Pipeline::new(&config, &runner).run(&opts).unwrap_err();
        assert!(matches!(err, SwrError::Validation { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn cleanup_runs_retention() {
        let (dir, mut config) = temp_config();
        config.retention.audio_months = 1;
        let old = config.artifact_roots().audio.join("20250101-20250108");
        std::fs::create_dir_all(&old).expect("mkdir");

        let runner = FakeRunner::default();
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&RunOptions::default())
            .expect("run");

        assert_eq!(result.cleanup.as_ref().map(|c| c.deleted.len()), Some(1));
        assert!(!old.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn cleanup_failure_is_reported_without_failing_the_run() {
        let (dir, mut config) = temp_config();
        config.retention.audio_months = 1;
        config.retention.transcripts_months = 1;
        config.retention.reports_months = 0;
        let roots = config.artifact_roots();
        std::fs::create_dir_all(&dir).expect("mkdir");
        // Audio root is unusable; transcripts still get cleaned.
        std::fs::write(&roots.audio, b"not a dir").expect("write");
        let expired = roots.transcripts.join("20250101-20250108");
        std::fs::create_dir_all(&expired).expect("mkdir");

        let runner = FakeRunner::default();
        let result = Pipeline::new(&config, &runner)
            .with_today(today())
            .run(&RunOptions::default())
            .expect("run");

        assert!(result.succeeded());
        assert_eq!(result.stages.status(Stage::Cleanup), StageStatus::Failed);
        let cleanup = result.cleanup.as_ref().expect("cleanup report");
        assert_eq!(cleanup.failures.len(), 1);
        assert_eq!(cleanup.deleted, vec![expired.clone()]);
        assert!(!expired.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
