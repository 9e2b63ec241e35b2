//! Production [`StageRunner`]: RSS download, whisper, `nlm`, and SMTP.

use tracing::{info, warn};

use swr_feeds::FeedFetcher;
use swr_notebook::NlmClient;
use swr_shared::{ArtifactCategory, Result, RetryPolicy, SwrError};

use crate::mail;
use crate::pipeline::{StageContext, StageRunner};
use crate::report::{self, Report};
use crate::transcribe::{self, WhisperCli};

/// Drives the external tools named in the config.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalRunner;

impl ExternalRunner {
    fn retry(ctx: &StageContext<'_>) -> RetryPolicy {
        RetryPolicy::from(&ctx.config.retry)
    }

    fn nlm(ctx: &StageContext<'_>) -> NlmClient {
        NlmClient::new(&ctx.config.nlm_path, Self::retry(ctx))
    }

    /// Notebook title for a run folder.
    pub fn notebook_title(ctx: &StageContext<'_>) -> String {
        format!("{} {}", ctx.config.notebooklm_notebook_prefix, ctx.folder)
    }
}

impl StageRunner for ExternalRunner {
    fn fetch(&self, ctx: &StageContext<'_>) -> Result<()> {
        let feeds = &ctx.config.feeds;
        if feeds.is_empty() {
            return Err(SwrError::stage(
                "fetch",
                "no feeds configured; add one with `swr podcast add`",
            ));
        }

        let fetcher = FeedFetcher::new(Self::retry(ctx))?;
        let summary = fetcher.fetch_all(feeds, &ctx.folder, &ctx.dir(ArtifactCategory::Audio))?;

        if summary.feed_errors.len() == feeds.len() {
            let detail = summary
                .feed_errors
                .iter()
                .map(|(name, err)| format!("{name}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SwrError::stage("fetch", format!("every feed failed ({detail})")));
        }
        if summary.available() == 0 {
            warn!(folder = %ctx.folder, "no episodes published in this window");
        }
        Ok(())
    }

    fn transcribe(&self, ctx: &StageContext<'_>) -> Result<()> {
        let engine = WhisperCli {
            command: ctx.config.whisper_command.clone(),
            model: ctx.config.whisper_model.clone(),
            language: ctx.config.whisper_language.clone(),
        };
        let summary = transcribe::transcribe_folder(
            &engine,
            &ctx.dir(ArtifactCategory::Audio),
            &ctx.dir(ArtifactCategory::Transcripts),
            &Self::retry(ctx),
        )?;
        info!(
            transcribed = summary.transcribed.len(),
            skipped = summary.skipped,
            invalid = summary.invalid.len(),
            "transcription finished"
        );
        Ok(())
    }

    fn upload(&self, ctx: &StageContext<'_>) -> Result<String> {
        let dir = ctx.dir(ArtifactCategory::Transcripts);
        let transcripts = if dir.is_dir() {
            transcribe::find_transcripts(&dir)?
        } else {
            Vec::new()
        };
        if transcripts.is_empty() {
            return Err(SwrError::stage(
                "upload",
                format!("no transcripts for {}", ctx.folder),
            ));
        }
        Self::nlm(ctx).publish(&Self::notebook_title(ctx), &transcripts)
    }

    fn generate_report(&self, ctx: &StageContext<'_>, notebook_id: &str) -> Result<Report> {
        let nlm = Self::nlm(ctx);

        if let Err(e) = nlm.create_briefing_doc(notebook_id, &ctx.config.report_language) {
            warn!(error = %e, "briefing doc not created; continuing with queries");
        }

        let summary = report::compose_sections(&ctx.config.report_sections, |question| {
            nlm.query(notebook_id, question)
        });
        report::validate_summary(&summary, ctx.config.report_min_chars as usize)?;

        Ok(Report {
            subject: report::subject(&ctx.config.notebooklm_notebook_prefix, &ctx.folder),
            body: report::body(&summary, notebook_id),
        })
    }

    fn deliver(&self, ctx: &StageContext<'_>, report: &Report) -> Result<()> {
        mail::send(ctx.config, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swr_shared::{Config, FolderId};

    fn ctx(config: &Config) -> StageContext<'_> {
        StageContext {
            config,
            folder: "20260218-20260225".parse::<FolderId>().expect("folder"),
            roots: config.artifact_roots(),
        }
    }

    #[test]
    fn fetch_without_feeds_fails() {
        let config = Config::default();
        let err = ExternalRunner.fetch(&ctx(&config)).unwrap_err();
        assert!(err.to_string().contains("no feeds configured"));
    }

    #[test]
    fn upload_without_transcripts_fails() {
        let dir = std::env::temp_dir().join(format!("swr-runner-test-{}", uuid::Uuid::now_v7()));
        let config = Config {
            parent_folder: dir.to_string_lossy().into_owned(),
            ..Config::default()
        };
        let err = ExternalRunner.upload(&ctx(&config)).unwrap_err();
        assert!(matches!(err, SwrError::Stage { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn notebook_title_uses_prefix_and_folder() {
        let config = Config {
            notebooklm_notebook_prefix: "Weekly".into(),
            ..Config::default()
        };
        assert_eq!(ExternalRunner::notebook_title(&ctx(&config)), "Weekly 20260218-20260225");
    }
}
