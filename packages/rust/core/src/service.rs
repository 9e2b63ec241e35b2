//! Transport-independent operations behind the background service.
//!
//! Every call reloads the config so edits made through the CLI apply
//! without restarting the service.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, instrument};

use swr_shared::{AppPaths, ArtifactCategory, ConfigStore, FolderId, Result, SwrError};

use crate::pipeline::{Pipeline, RunOptions, RunResult, StageRunner};
use crate::report;

/// Lines returned by [`Service::get_logs`] when the caller gives none.
pub const DEFAULT_LOG_LINES: usize = 100;

/// Stage names accepted in [`RunRequest::stages`].
pub const STAGE_NAMES: [&str; 5] = ["fetch", "transcribe", "upload", "email", "cleanup"];

/// A pipeline run as requested over the service.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    /// Stages to run; `None` runs all of them.
    #[serde(default)]
    pub stages: Option<Vec<String>>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub notebook_id: Option<String>,
    /// `false` saves the report without mailing it.
    #[serde(default = "default_send_email")]
    pub send_email: bool,
}

fn default_send_email() -> bool {
    true
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            stages: None,
            folder: None,
            notebook_id: None,
            send_email: true,
        }
    }
}

impl RunRequest {
    /// Translate into pipeline options; stages not listed are skipped.
    pub fn to_options(&self) -> Result<RunOptions> {
        let mut opts = RunOptions {
            folder: self.folder.clone(),
            notebook_id: self.notebook_id.clone(),
            save_report_only: !self.send_email,
            ..RunOptions::default()
        };

        if let Some(stages) = &self.stages {
            let mut wanted = Vec::with_capacity(stages.len());
            for stage in stages {
                let name = stage.trim().to_ascii_lowercase();
                // "report" is accepted as an alias for the email stage
                let name = if name == "report" { "email".to_string() } else { name };
                if !STAGE_NAMES.contains(&name.as_str()) {
                    return Err(SwrError::validation(format!(
                        "unknown stage '{stage}'; expected one of {}",
                        STAGE_NAMES.join(", ")
                    )));
                }
                wanted.push(name);
            }
            let skip = |name: &str| !wanted.iter().any(|w| w == name);
            opts.skip_fetch = skip("fetch");
            opts.skip_transcribe = skip("transcribe");
            opts.skip_upload = skip("upload");
            opts.skip_email = skip("email");
            opts.skip_cleanup = skip("cleanup");
        }
        Ok(opts)
    }
}

/// One folder under `reports/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportListing {
    pub folder: FolderId,
    pub has_report: bool,
}

pub struct Service<R: StageRunner> {
    store: ConfigStore,
    runner: R,
    log_path: PathBuf,
    today: Option<NaiveDate>,
}

impl<R: StageRunner> Service<R> {
    pub fn new(store: ConfigStore, runner: R) -> Self {
        let log_path = AppPaths::for_config(store.path()).pipeline_log;
        Self {
            store,
            runner,
            log_path,
            today: None,
        }
    }

    /// Fix the run date instead of using the clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Run the pipeline. Blocks until every stage has finished.
    #[instrument(skip_all, fields(folder = ?request.folder))]
    pub fn run_pipeline(&self, request: &RunRequest) -> Result<RunResult> {
        let opts = request.to_options()?;
        let config = self.store.load()?;
        let mut pipeline = Pipeline::new(&config, &self.runner);
        if let Some(today) = self.today {
            pipeline = pipeline.with_today(today);
        }
        pipeline.run(&opts)
    }

    /// Report folders, newest first.
    pub fn list_reports(&self) -> Result<Vec<ReportListing>> {
        let config = self.store.load()?;
        let roots = config.artifact_roots();
        let dir = roots.root(ArtifactCategory::Reports);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut listings = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| SwrError::io(dir, e))? {
            let entry = entry.map_err(|e| SwrError::io(dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(folder) = entry.file_name().to_str().and_then(|n| n.parse::<FolderId>().ok())
            else {
                continue;
            };
            listings.push(ReportListing {
                has_report: report::report_path(&roots, &folder).is_file(),
                folder,
            });
        }
        listings.sort_by(|a, b| b.folder.cmp(&a.folder));
        Ok(listings)
    }

    /// Report text for `folder`, or for the newest folder when `None`.
    pub fn get_report(&self, folder: Option<&str>) -> Result<String> {
        let folder = match folder {
            Some(raw) => raw.parse::<FolderId>()?,
            None => self
                .list_reports()?
                .into_iter()
                .next()
                .map(|l| l.folder)
                .ok_or_else(|| SwrError::NotFound {
                    kind: "report",
                    value: "(latest)".into(),
                })?,
        };

        let config = self.store.load()?;
        let path = report::report_path(&config.artifact_roots(), &folder);
        if !path.is_file() {
            return Err(SwrError::NotFound {
                kind: "report",
                value: folder.to_string(),
            });
        }
        info!(folder = %folder, "serving report");
        std::fs::read_to_string(&path).map_err(|e| SwrError::io(path, e))
    }

    /// Last `lines` lines of the scheduled-run log.
    pub fn get_logs(&self, lines: usize) -> Result<String> {
        if !self.log_path.is_file() {
            return Err(SwrError::NotFound {
                kind: "pipeline log",
                value: self.log_path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(&self.log_path)
            .map_err(|e| SwrError::io(&self.log_path, e))?;
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].join("\n"))
    }
}

/// Text rendering of [`Service::list_reports`].
pub fn render_report_list(listings: &[ReportListing]) -> String {
    if listings.is_empty() {
        return "No reports found.".into();
    }
    let mut lines = vec!["Available reports (newest first):".to_string()];
    for listing in listings {
        let status = if listing.has_report { "ok" } else { "no report file" };
        lines.push(format!("  {}  [{status}]", listing.folder));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageContext;
    use crate::report::Report;
    use crate::stage::{Stage, StageStatus};
    use swr_shared::Config;

    struct OkRunner;

    impl StageRunner for OkRunner {
        fn fetch(&self, _ctx: &StageContext<'_>) -> Result<()> {
            Ok(())
        }
        fn transcribe(&self, _ctx: &StageContext<'_>) -> Result<()> {
            Ok(())
        }
        fn upload(&self, _ctx: &StageContext<'_>) -> Result<String> {
            Ok("nb-1".into())
        }
        fn generate_report(&self, ctx: &StageContext<'_>, notebook_id: &str) -> Result<Report> {
            Ok(Report {
                subject: report::subject("W", &ctx.folder),
                body: report::body("weekly summary", notebook_id),
            })
        }
        fn deliver(&self, _ctx: &StageContext<'_>, _report: &Report) -> Result<()> {
            Ok(())
        }
    }

    fn service() -> (PathBuf, Service<OkRunner>) {
        let dir = std::env::temp_dir().join(format!("swr-service-test-{}", uuid::Uuid::now_v7()));
        let store = ConfigStore::new(dir.join("config.toml"));
        let config = Config {
            parent_folder: dir.join("data").to_string_lossy().into_owned(),
            ..Config::default()
        };
        store.init(&config).expect("init");
        let service = Service::new(store, OkRunner)
            .with_today(NaiveDate::from_ymd_opt(2026, 2, 25).expect("date"));
        (dir, service)
    }

    #[test]
    fn stage_list_maps_to_skip_flags() {
        let request = RunRequest {
            stages: Some(vec!["email".into(), "Cleanup".into()]),
            send_email: false,
            ..RunRequest::default()
        };
        let opts = request.to_options().expect("options");
        assert!(opts.skip_fetch && opts.skip_transcribe && opts.skip_upload);
        assert!(!opts.skip_email && !opts.skip_cleanup);
        assert!(opts.save_report_only);

        let bad = RunRequest {
            stages: Some(vec!["deploy".into()]),
            ..RunRequest::default()
        };
        assert!(matches!(bad.to_options(), Err(SwrError::Validation { .. })));
    }

    #[test]
    fn run_then_list_and_read_reports() {
        let (dir, service) = service();
        assert!(service.list_reports().expect("list").is_empty());
        assert!(matches!(service.get_report(None), Err(SwrError::NotFound { .. })));

        let result = service.run_pipeline(&RunRequest::default()).expect("run");
        assert!(result.succeeded());
        assert_eq!(result.stages.status(Stage::Report), StageStatus::Success);

        // A folder with only a notebook id has no report yet.
        let roots = service.store().load().expect("load").artifact_roots();
        let older: FolderId = "20260101-20260108".parse().expect("folder");
        report::record_notebook_id(&roots, &older, "nb-0").expect("record");

        let listings = service.list_reports().expect("list");
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].folder.to_string(), "20260218-20260225");
        assert!(listings[0].has_report);
        assert!(!listings[1].has_report);
        assert!(render_report_list(&listings).contains("no report file"));

        let latest = service.get_report(None).expect("latest");
        assert!(latest.starts_with("weekly summary"));
        assert!(matches!(
            service.get_report(Some("20260101-20260108")),
            Err(SwrError::NotFound { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn logs_are_tailed() {
        let (dir, service) = service();
        let log = dir.join("pipeline.log");
        let service = service.with_log_path(&log);
        assert!(service.get_logs(5).is_err());

        let text: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&log, text).expect("write log");
        assert_eq!(service.get_logs(3).expect("tail"), "line 8\nline 9\nline 10");
        assert_eq!(service.get_logs(100).expect("tail").lines().count(), 10);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
