//! Podcast feed fetching and episode download.
//!
//! For each configured feed, the fetcher reads the RSS document, keeps the
//! episodes whose publication date falls inside the run's [`FolderId`]
//! window, and downloads their audio as `<feed name>_<YYYYMMDD><ext>` into
//! the run's audio folder. Files already on disk are left alone.

mod parser;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use swr_shared::{Feed, FolderId, Result, RetryPolicy, SwrError};
use tracing::{debug, info, instrument, warn};

pub use parser::{Episode, parse_feed, parse_pub_date};

/// Default timeout for feed and audio requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

const MAX_REDIRECTS: usize = 10;

/// Extension used when the enclosure URL has none.
const DEFAULT_AUDIO_EXT: &str = ".mp3";

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("swr/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// FetchSummary
// ---------------------------------------------------------------------------

/// Outcome of fetching every feed for one run.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// Files written by this run.
    pub downloaded: Vec<PathBuf>,
    /// In-window episodes already present on disk.
    pub already_present: usize,
    /// Feeds that could not be fetched (feed name, error).
    pub feed_errors: Vec<(String, String)>,
    /// Episodes whose download failed (file name, error).
    pub download_errors: Vec<(String, String)>,
}

impl FetchSummary {
    /// Audio files available for the run, new or pre-existing.
    pub fn available(&self) -> usize {
        self.downloaded.len() + self.already_present
    }
}

// ---------------------------------------------------------------------------
// FeedFetcher
// ---------------------------------------------------------------------------

/// Blocking feed client. Run it off the async executor.
pub struct FeedFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl FeedFetcher {
    pub fn new(retry: RetryPolicy) -> Result<Self> {
        Self::with_timeout(retry, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| SwrError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, retry })
    }

    /// Download every in-window episode of every feed into `audio_dir`.
    ///
    /// Per-feed and per-episode failures are collected, not returned.
    #[instrument(skip_all, fields(folder = %folder, feeds = feeds.len()))]
    pub fn fetch_all(&self, feeds: &[Feed], folder: &FolderId, audio_dir: &Path) -> Result<FetchSummary> {
        std::fs::create_dir_all(audio_dir).map_err(|e| SwrError::io(audio_dir, e))?;

        let mut summary = FetchSummary::default();
        for feed in feeds {
            info!(feed = %feed.name, "fetching feed");
            let episodes = match self.fetch_feed(feed) {
                Ok(episodes) => episodes,
                Err(e) => {
                    warn!(feed = %feed.name, error = %e, "could not fetch feed");
                    summary.feed_errors.push((feed.name.clone(), e.to_string()));
                    continue;
                }
            };
            self.download_feed(feed, &episodes, folder, audio_dir, &mut summary);
        }

        info!(
            downloaded = summary.downloaded.len(),
            already_present = summary.already_present,
            feed_errors = summary.feed_errors.len(),
            download_errors = summary.download_errors.len(),
            "fetch completed"
        );
        Ok(summary)
    }

    /// Fetch and parse one feed.
    pub fn fetch_feed(&self, feed: &Feed) -> Result<Vec<Episode>> {
        let body = self.retry.run(&feed.name, |_| {
            let response = self
                .client
                .get(&feed.url)
                .send()
                .map_err(|e| SwrError::Network(format!("{}: {e}", feed.url)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(SwrError::Network(format!("{}: HTTP {status}", feed.url)));
            }
            response
                .text()
                .map_err(|e| SwrError::Network(format!("{}: failed to read body: {e}", feed.url)))
        })?;

        let episodes = parse_feed(&body);
        if episodes.is_empty() && !body.contains("<channel") && !body.contains("<feed") {
            return Err(SwrError::validation(format!(
                "{}: response is not an RSS or Atom feed",
                feed.url
            )));
        }
        debug!(feed = %feed.name, items = episodes.len(), "feed parsed");
        Ok(episodes)
    }

    fn download_feed(
        &self,
        feed: &Feed,
        episodes: &[Episode],
        folder: &FolderId,
        audio_dir: &Path,
        summary: &mut FetchSummary,
    ) {
        for episode in episodes {
            let Some(published) = episode.published else {
                continue;
            };
            if !folder.contains(published) {
                continue;
            }
            let Some(audio_url) = episode.audio_url.as_deref() else {
                debug!(title = %episode.title, "no audio enclosure, skipping");
                continue;
            };

            let file_name = format!(
                "{}_{}{}",
                feed.name,
                published.format("%Y%m%d"),
                url_extension(audio_url)
            );
            let dest = audio_dir.join(&file_name);

            if dest.exists() {
                debug!(file = %file_name, "already downloaded");
                summary.already_present += 1;
                continue;
            }

            info!(file = %file_name, "downloading episode");
            match self.retry.run(&file_name, |_| self.download(audio_url, &dest)) {
                Ok(()) => summary.downloaded.push(dest),
                Err(e) => {
                    warn!(file = %file_name, error = %e, "download failed");
                    summary.download_errors.push((file_name, e.to_string()));
                }
            }
        }
    }

    /// Stream `url` into `dest`; a partial file is removed on failure.
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut response = self
                .client
                .get(url)
                .send()
                .map_err(|e| SwrError::Network(format!("{url}: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(SwrError::Network(format!("{url}: HTTP {status}")));
            }
            let mut file = File::create(dest).map_err(|e| SwrError::io(dest, e))?;
            response
                .copy_to(&mut file)
                .map_err(|e| SwrError::Network(format!("{url}: {e}")))?;
            Ok(())
        })();

        if result.is_err() && dest.exists() {
            let _ = std::fs::remove_file(dest);
        }
        result
    }
}

/// File extension of the URL path (with the dot), defaulting to `.mp3`.
pub fn url_extension(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or(url).to_string());
    let file = path.rsplit('/').next().unwrap_or("");
    match file.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < file.len() => file[idx..].to_string(),
        _ => DEFAULT_AUDIO_EXT.to_string(),
    }
}
