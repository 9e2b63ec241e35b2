//! Application configuration for SWR.
//!
//! User config lives at `~/.config/swr/config.toml`; `--config` / `SWR_CONFIG`
//! point elsewhere. Missing fields fall back to defaults. The SMTP password is
//! taken from `EMAIL_SMTP_PASSWORD` before the file value.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SwrError};
use crate::types::ArtifactRoots;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config directory relative to the user's home.
const CONFIG_DIR_NAME: &str = ".config/swr";

/// Environment variable holding the SMTP submission password.
pub const SMTP_PASSWORD_ENV: &str = "EMAIL_SMTP_PASSWORD";

/// Placeholder shown instead of secrets.
pub const REDACTED: &str = "***";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s,;<>]+@[^@\s,;<>]+\.[^@\s,;<>.]+$").expect("static email regex")
});

// ---------------------------------------------------------------------------
// Config structs (matching config.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
///
/// Scalars come first, then tables, then arrays of tables, so the TOML
/// serializer emits a valid document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data folder holding `audio/`, `transcripts/`, and `reports/`.
    #[serde(default = "default_parent_folder")]
    pub parent_folder: String,

    /// Days covered by an automatically derived run folder.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Whisper model name passed to the transcription CLI.
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,

    /// Language hint for transcription.
    #[serde(default = "default_whisper_language")]
    pub whisper_language: String,

    /// Transcription executable.
    #[serde(default = "default_whisper_command")]
    pub whisper_command: String,

    /// Notebook titles are `<prefix> <folder id>`.
    #[serde(default = "default_notebook_prefix")]
    pub notebooklm_notebook_prefix: String,

    /// Path to the `nlm` notebook CLI.
    #[serde(default = "default_nlm_path")]
    pub nlm_path: String,

    /// Output language requested for generated reports.
    #[serde(default = "default_report_language")]
    pub report_language: String,

    /// Reports shorter than this are treated as a failed generation.
    #[serde(default = "default_report_min_chars")]
    pub report_min_chars: u32,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Podcast feeds, in fetch order.
    #[serde(default)]
    pub feeds: Vec<Feed>,

    /// Questions asked of the notebook, one report section each.
    #[serde(default = "default_report_sections")]
    pub report_sections: Vec<ReportSection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parent_folder: default_parent_folder(),
            lookback_days: default_lookback_days(),
            whisper_model: default_whisper_model(),
            whisper_language: default_whisper_language(),
            whisper_command: default_whisper_command(),
            notebooklm_notebook_prefix: default_notebook_prefix(),
            nlm_path: default_nlm_path(),
            report_language: default_report_language(),
            report_min_chars: default_report_min_chars(),
            email: EmailConfig::default(),
            retention: RetentionConfig::default(),
            retry: RetryConfig::default(),
            feeds: Vec::new(),
            report_sections: default_report_sections(),
        }
    }
}

fn default_parent_folder() -> String {
    "~/swr-data".into()
}
fn default_lookback_days() -> u32 {
    7
}
fn default_whisper_model() -> String {
    "medium".into()
}
fn default_whisper_language() -> String {
    "zh".into()
}
fn default_whisper_command() -> String {
    "whisper".into()
}
fn default_notebook_prefix() -> String {
    "股市週報".into()
}
fn default_nlm_path() -> String {
    "nlm".into()
}
fn default_report_language() -> String {
    "zh-TW".into()
}
fn default_report_min_chars() -> u32 {
    5_000
}

/// `[[feeds]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// Unique program name; also the prefix of downloaded file names.
    pub name: String,
    /// RSS feed URL.
    pub url: String,
}

/// `[email]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Receivers. Accepts a single string or a list on input.
    #[serde(default, deserialize_with = "string_or_list")]
    pub to: Vec<String>,

    /// Sender address.
    #[serde(default, rename = "from")]
    pub from_addr: String,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Login user; the sender address is used when empty.
    #[serde(default)]
    pub smtp_user: String,

    /// Fallback only; prefer the `EMAIL_SMTP_PASSWORD` environment variable.
    #[serde(default)]
    pub smtp_password: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            to: Vec::new(),
            from_addr: String::new(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_password: String::new(),
        }
    }
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}

/// `[retention]` section. Months to keep each category; 0 keeps forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_audio_months")]
    pub audio_months: u32,
    #[serde(default)]
    pub transcripts_months: u32,
    #[serde(default)]
    pub reports_months: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            audio_months: default_audio_months(),
            transcripts_months: 0,
            reports_months: 0,
        }
    }
}

fn default_audio_months() -> u32 {
    3
}

/// Largest accepted `retry.multiplier`.
pub const MAX_RETRY_MULTIPLIER: f64 = 10.0;

/// Largest accepted `retry.base_delay_secs`.
pub const MAX_RETRY_BASE_DELAY_SECS: u64 = 3600;

/// `[retry]` section, applied to collaborator calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    5
}
fn default_multiplier() -> f64 {
    2.0
}

/// `[[report_sections]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub question: String,
}

fn default_report_sections() -> Vec<ReportSection> {
    let section = |title: &str, question: &str| ReportSection {
        title: title.into(),
        question: question.into(),
    };
    vec![
        section(
            "1. Macro economy and global markets",
            "Give a detailed analysis of every macroeconomic topic discussed across this week's \
             episodes: central bank policy, trade and government policy, market performance and \
             fund flows, geopolitical risk, currencies and commodities, and the cycle outlook. \
             Quote the concrete figures and forecasts the hosts mention.",
        ),
        section(
            "2. Stocks and sectors",
            "Analyse every individual stock and sector mentioned this week, grouped by market and \
             then by industry. For each, cover fundamentals, the host's view and rating, the full \
             reasoning behind it, expected catalysts, and stated exit conditions.",
        ),
        section(
            "3. Episode summaries",
            "Summarise each episode in broadcast order, labelled with program name and air date: \
             core thesis, the argument in full, cited numbers and cases, how the host reached the \
             conclusion, and the concrete advice given.",
        ),
        section(
            "4. Strategy and key risks",
            "Synthesise the week's views into overall sentiment, a comparison of the hosts' \
             styles, short/medium/long-term positioning, the risk factors to watch, and the \
             indicators and events to track next.",
        ),
        section(
            "5. Recommendation table",
            "List every stock or instrument mentioned as a Markdown table with columns: \
             ticker/name | market | direction (bullish/bearish/watch) | reasoning | host/program.",
        ),
    ]
}

/// Accept `to = "a@x.com"` as well as `to = ["a@x.com", "b@y.com"]`.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

// ---------------------------------------------------------------------------
// Validation & derived values
// ---------------------------------------------------------------------------

/// Whether `addr` looks like a deliverable email address.
pub fn is_valid_email(addr: &str) -> bool {
    EMAIL_RE.is_match(addr)
}

/// Check a feed URL parses and uses http(s).
pub fn validate_feed_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| SwrError::validation(format!("invalid feed URL '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SwrError::validation(format!(
            "invalid feed URL '{url}': unsupported scheme '{other}'"
        ))),
    }
}

impl Config {
    /// Enforce the schema invariants that types alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.parent_folder.trim().is_empty() {
            return Err(SwrError::validation("parent_folder must not be empty"));
        }
        if !(1..=366).contains(&self.lookback_days) {
            return Err(SwrError::validation(format!(
                "lookback_days must be between 1 and 366, got {}",
                self.lookback_days
            )));
        }
        if self.email.smtp_port == 0 {
            return Err(SwrError::validation("email.smtp_port must be non-zero"));
        }
        if !(1.0..=MAX_RETRY_MULTIPLIER).contains(&self.retry.multiplier) {
            return Err(SwrError::validation(format!(
                "retry.multiplier must be between 1.0 and {MAX_RETRY_MULTIPLIER}, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.base_delay_secs > MAX_RETRY_BASE_DELAY_SECS {
            return Err(SwrError::validation(format!(
                "retry.base_delay_secs must be at most {MAX_RETRY_BASE_DELAY_SECS}, got {}",
                self.retry.base_delay_secs
            )));
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(SwrError::validation("feed name must not be empty"));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(SwrError::DuplicateEntry {
                    kind: "feed",
                    value: feed.name.clone(),
                });
            }
            validate_feed_url(&feed.url)?;
        }

        let mut receivers = HashSet::new();
        for addr in &self.email.to {
            if !is_valid_email(addr) {
                return Err(SwrError::validation(format!("invalid email address '{addr}'")));
            }
            if !receivers.insert(addr.to_ascii_lowercase()) {
                return Err(SwrError::DuplicateEntry {
                    kind: "receiver",
                    value: addr.clone(),
                });
            }
        }
        if !self.email.from_addr.is_empty() && !is_valid_email(&self.email.from_addr) {
            return Err(SwrError::validation(format!(
                "invalid sender address '{}'",
                self.email.from_addr
            )));
        }

        Ok(())
    }

    /// Data folder with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.parent_folder)
    }

    /// Artifact roots below the data folder.
    pub fn artifact_roots(&self) -> ArtifactRoots {
        ArtifactRoots::under(self.data_dir())
    }

    /// SMTP login user, defaulting to the sender address.
    pub fn smtp_user(&self) -> &str {
        if self.email.smtp_user.is_empty() {
            &self.email.from_addr
        } else {
            &self.email.smtp_user
        }
    }

    /// SMTP password: environment first, then the file value.
    pub fn smtp_password(&self) -> Option<String> {
        match std::env::var(SMTP_PASSWORD_ENV) {
            Ok(val) if !val.is_empty() => Some(val),
            _ if !self.email.smtp_password.is_empty() => Some(self.email.smtp_password.clone()),
            _ => None,
        }
    }

    /// Copy safe for display, with secrets replaced by [`REDACTED`].
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if !copy.email.smtp_password.is_empty() {
            copy.email.smtp_password = REDACTED.into();
        }
        copy
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.config/swr/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| SwrError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the default config file path (`~/.config/swr/config.toml`).
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Files that live next to a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_file: PathBuf,
    /// Append-only log written by the scheduled wrapper.
    pub pipeline_log: PathBuf,
    /// Wrapper script invoked by the schedule entry.
    pub wrapper_script: PathBuf,
}

impl AppPaths {
    pub fn for_config(config_file: impl Into<PathBuf>) -> Self {
        let config_file = config_file.into();
        let dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            pipeline_log: dir.join("logs").join("pipeline.log"),
            wrapper_script: dir.join("run.sh"),
            config_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("parent_folder"));
        assert!(toml_str.contains("[retention]"));
        assert!(toml_str.contains("audio_months = 3"));
    }

    #[test]
    fn config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_with_feeds_and_single_receiver() {
        let toml_str = r#"
parent_folder = "/tmp/swr"

[email]
to = "ops@example.com"
from = "bot@example.com"

[[feeds]]
name = "Morning Call"
url = "https://feeds.example.com/morning.xml"
"#;
        let config: Config = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].name, "Morning Call");
        assert_eq!(config.email.to, vec!["ops@example.com".to_string()]);
        assert_eq!(config.email.from_addr, "bot@example.com");
        assert_eq!(config.smtp_user(), "bot@example.com");
        assert_eq!(config.email.smtp_port, 587);
        config.validate().expect("valid");
    }

    #[test]
    fn validation_rejects_duplicates_and_bad_emails() {
        let mut config = Config::default();
        config.feeds = vec![
            Feed { name: "a".into(), url: "https://x.test/a.xml".into() },
            Feed { name: "a".into(), url: "https://x.test/b.xml".into() },
        ];
        assert!(matches!(config.validate(), Err(SwrError::DuplicateEntry { kind: "feed", .. })));

        let mut config = Config::default();
        config.email.to = vec!["not-an-email".into()];
        assert!(matches!(config.validate(), Err(SwrError::Validation { .. })));

        let mut config = Config::default();
        config.lookback_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_settings_are_bounded() {
        for multiplier in [0.5, 1e300, f64::INFINITY, f64::NAN] {
            let mut config = Config::default();
            config.retry.multiplier = multiplier;
            assert!(matches!(config.validate(), Err(SwrError::Validation { .. })), "{multiplier}");
        }

        let mut config = Config::default();
        config.retry.base_delay_secs = MAX_RETRY_BASE_DELAY_SECS + 1;
        assert!(matches!(config.validate(), Err(SwrError::Validation { .. })));

        config.retry.base_delay_secs = MAX_RETRY_BASE_DELAY_SECS;
        config.retry.multiplier = MAX_RETRY_MULTIPLIER;
        config.validate().expect("upper bounds are accepted");
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("a.b+c@example.co.uk"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@example.com"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn feed_urls_must_be_http() {
        assert!(validate_feed_url("https://example.com/rss").is_ok());
        assert!(validate_feed_url("ftp://example.com/rss").is_err());
        assert!(validate_feed_url("not a url").is_err());
    }

    #[test]
    fn redaction_hides_password() {
        let mut config = Config::default();
        config.email.smtp_password = "hunter2".into();
        let shown = toml::to_string_pretty(&config.redacted()).expect("serialize");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn app_paths_sit_next_to_config() {
        let paths = AppPaths::for_config("/home/u/.config/swr/config.toml");
        assert_eq!(paths.pipeline_log, PathBuf::from("/home/u/.config/swr/logs/pipeline.log"));
        assert_eq!(paths.wrapper_script, PathBuf::from("/home/u/.config/swr/run.sh"));
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/swr-data"), home.join("swr-data"));
        }
    }
}
