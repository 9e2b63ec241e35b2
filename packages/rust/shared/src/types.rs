//! Core domain types: run folder identifiers and artifact layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Days, NaiveDate};

use crate::error::{Result, SwrError};

// ---------------------------------------------------------------------------
// FolderId
// ---------------------------------------------------------------------------

/// Date-range key for one run's artifacts, rendered as `YYYYMMDD-YYYYMMDD`.
///
/// The same identifier names the run's directory under every artifact
/// category, which is what lets a later run locate earlier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId {
    start: NaiveDate,
    end: NaiveDate,
}

impl FolderId {
    /// Build a folder id; `start` must not be after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(SwrError::validation(format!(
                "folder start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The window ending `today` and starting `lookback_days` earlier.
    pub fn for_lookback(today: NaiveDate, lookback_days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Whether `date` falls inside the window (inclusive on both ends).
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Human-readable range, e.g. `2026/02/18 – 2026/02/25`.
    pub fn display_range(&self) -> String {
        format!(
            "{} – {}",
            self.start.format("%Y/%m/%d"),
            self.end.format("%Y/%m/%d")
        )
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%Y%m%d"),
            self.end.format("%Y%m%d")
        )
    }
}

impl FromStr for FolderId {
    type Err = SwrError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid =
            || SwrError::validation(format!("invalid folder '{s}': expected YYYYMMDD-YYYYMMDD"));

        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start = parse_compact_date(start).ok_or_else(invalid)?;
        let end = parse_compact_date(end).ok_or_else(invalid)?;
        Self::new(start, end)
    }
}

/// Parse `YYYYMMDD` into a date.
fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = s[0..4].parse().ok()?;
    let month = s[4..6].parse().ok()?;
    let day = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ---------------------------------------------------------------------------
// Artifact layout
// ---------------------------------------------------------------------------

/// The three independently-retained artifact categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactCategory {
    Audio,
    Transcripts,
    Reports,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 3] = [Self::Audio, Self::Transcripts, Self::Reports];

    /// Directory name under the data folder.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Transcripts => "transcripts",
            Self::Reports => "reports",
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Root directories for each artifact category.
///
/// Layout: `<parent>/<category>/<folder id>/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRoots {
    pub audio: PathBuf,
    pub transcripts: PathBuf,
    pub reports: PathBuf,
}

impl ArtifactRoots {
    /// Standard layout below a data folder.
    pub fn under(parent: impl AsRef<Path>) -> Self {
        let parent = parent.as_ref();
        Self {
            audio: parent.join(ArtifactCategory::Audio.dir_name()),
            transcripts: parent.join(ArtifactCategory::Transcripts.dir_name()),
            reports: parent.join(ArtifactCategory::Reports.dir_name()),
        }
    }

    pub fn root(&self, category: ArtifactCategory) -> &Path {
        match category {
            ArtifactCategory::Audio => &self.audio,
            ArtifactCategory::Transcripts => &self.transcripts,
            ArtifactCategory::Reports => &self.reports,
        }
    }

    /// Directory holding one run's artifacts of the given category.
    pub fn folder(&self, category: ArtifactCategory, folder: &FolderId) -> PathBuf {
        self.root(category).join(folder.to_string())
    }
}
