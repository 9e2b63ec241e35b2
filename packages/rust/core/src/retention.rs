//! Age-based artifact cleanup.
//!
//! An artifact is a run folder (`<category>/<YYYYMMDD-YYYYMMDD>`). Its age is
//! taken from the end date embedded in the name, not from filesystem times,
//! so copied or restored folders age correctly.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use swr_shared::{ArtifactCategory, ArtifactRoots, FolderId, RetentionConfig};
use tracing::{debug, info, instrument, warn};

/// A deletion that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub retained: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Threshold in months for a category; 0 keeps forever.
pub fn threshold(retention: &RetentionConfig, category: ArtifactCategory) -> u32 {
    match category {
        ArtifactCategory::Audio => retention.audio_months,
        ArtifactCategory::Transcripts => retention.transcripts_months,
        ArtifactCategory::Reports => retention.reports_months,
    }
}

/// Whole calendar months from `from` to `to`; 0 if `to` is not later.
pub fn whole_months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    if to <= from {
        return 0;
    }
    let estimate = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    let mut months = u32::try_from(estimate).unwrap_or(0);
    while months > 0
        && from
            .checked_add_months(Months::new(months))
            .is_none_or(|d| d > to)
    {
        months -= 1;
    }
    months
}

/// Delete every run folder older than its category's threshold.
///
/// Entries whose names are not folder ids are never touched. Failures are
/// collected and the pass continues with the next entry.
pub fn clean(retention: &RetentionConfig, roots: &ArtifactRoots, today: NaiveDate) -> CleanupReport {
    clean_with(retention, roots, today, remove_artifact)
}

/// [`clean`] with the deletion step supplied by the caller.
#[instrument(skip_all, fields(today = %today))]
pub fn clean_with(
    retention: &RetentionConfig,
    roots: &ArtifactRoots,
    today: NaiveDate,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    for category in ArtifactCategory::ALL {
        let max_months = threshold(retention, category);
        if max_months == 0 {
            debug!(%category, "retention disabled");
            continue;
        }
        clean_category(roots.root(category), max_months, today, &mut remove, &mut report);
    }

    info!(
        deleted = report.deleted.len(),
        retained = report.retained,
        failures = report.failures.len(),
        "cleanup completed"
    );
    report
}

fn remove_artifact(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn clean_category(
    root: &Path,
    max_months: u32,
    today: NaiveDate,
    remove: &mut impl FnMut(&Path) -> io::Result<()>,
    report: &mut CleanupReport,
) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(path = ?root, error = %e, "could not list artifacts");
            report.failures.push(CleanupFailure {
                path: root.to_path_buf(),
                error: e.to_string(),
            });
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = ?root, error = %e, "could not read artifact entry");
                report.failures.push(CleanupFailure {
                    path: root.to_path_buf(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        let name = entry.file_name();
        let Some(folder) = name.to_str().and_then(|n| n.parse::<FolderId>().ok()) else {
            continue;
        };

        let age = whole_months_between(folder.end(), today);
        if age <= max_months {
            report.retained += 1;
            continue;
        }

        let path = entry.path();
        match remove(&path) {
            Ok(()) => {
                info!(path = ?path, age_months = age, "deleted expired artifact");
                report.deleted.push(path);
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "could not delete artifact");
                report.failures.push(CleanupFailure {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn temp_roots() -> (PathBuf, ArtifactRoots) {
        let dir = std::env::temp_dir().join(format!("swr-retention-test-{}", uuid::Uuid::now_v7()));
        let roots = ArtifactRoots::under(&dir);
        (dir, roots)
    }

    fn make_folder(roots: &ArtifactRoots, category: ArtifactCategory, name: &str) -> PathBuf {
        let path = roots.root(category).join(name);
        std::fs::create_dir_all(&path).expect("mkdir");
        std::fs::write(path.join("file.bin"), b"x").expect("write");
        path
    }

    #[test]
    fn month_arithmetic() {
        assert_eq!(whole_months_between(date(2026, 2, 25), date(2026, 6, 25)), 4);
        assert_eq!(whole_months_between(date(2026, 2, 25), date(2026, 6, 24)), 3);
        // Month-end dates clamp to the shorter month.
        assert_eq!(whole_months_between(date(2025, 11, 30), date(2026, 2, 28)), 3);
        assert_eq!(whole_months_between(date(2025, 11, 30), date(2026, 2, 27)), 2);
        assert_eq!(whole_months_between(date(2026, 1, 31), date(2026, 2, 28)), 1);
        assert_eq!(whole_months_between(date(2026, 6, 1), date(2026, 2, 1)), 0);
    }

    #[test]
    fn three_month_audio_retention() {
        let (dir, roots) = temp_roots();
        let today = date(2026, 6, 25);
        // Ends exactly four months ago.
        let old = make_folder(&roots, ArtifactCategory::Audio, "20260218-20260225");
        // Ends exactly two months ago.
        let recent = make_folder(&roots, ArtifactCategory::Audio, "20260418-20260425");
        // Ends exactly three months ago: not strictly older than the threshold.
        let edge = make_folder(&roots, ArtifactCategory::Audio, "20260318-20260325");

        let retention = RetentionConfig {
            audio_months: 3,
            transcripts_months: 0,
            reports_months: 0,
        };
        let report = clean(&retention, &roots, today);

        assert_eq!(report.deleted, vec![old.clone()]);
        assert_eq!(report.retained, 2);
        assert!(report.is_clean());
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(edge.exists());

        // Idempotent.
        let again = clean(&retention, &roots, today);
        assert!(again.deleted.is_empty());
        assert_eq!(again.retained, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn zero_threshold_keeps_everything() {
        let (dir, roots) = temp_roots();
        let ancient = make_folder(&roots, ArtifactCategory::Audio, "20100101-20100108");
        let transcript = make_folder(&roots, ArtifactCategory::Transcripts, "20100101-20100108");

        let retention = RetentionConfig {
            audio_months: 0,
            transcripts_months: 0,
            reports_months: 0,
        };
        let report = clean(&retention, &roots, date(2026, 6, 25));

        assert!(report.deleted.is_empty());
        assert_eq!(report.retained, 0);
        assert!(ancient.exists());
        assert!(transcript.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn categories_are_independent_and_foreign_entries_ignored() {
        let (dir, roots) = temp_roots();
        let audio = make_folder(&roots, ArtifactCategory::Audio, "20250101-20250108");
        let report_dir = make_folder(&roots, ArtifactCategory::Reports, "20250101-20250108");
        let notes = make_folder(&roots, ArtifactCategory::Audio, "notes");
        let loose = roots.root(ArtifactCategory::Audio).join("20250101-20250108.zip");
        std::fs::write(&loose, b"zip").expect("write");

        let retention = RetentionConfig {
            audio_months: 1,
            transcripts_months: 0,
            reports_months: 24,
        };
        let report = clean(&retention, &roots, date(2026, 1, 10));

        assert_eq!(report.deleted, vec![audio.clone()]);
        assert!(!audio.exists());
        assert!(report_dir.exists());
        assert!(notes.exists());
        assert!(loose.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_deletion_does_not_stop_siblings() {
        let (dir, roots) = temp_roots();
        let stuck = make_folder(&roots, ArtifactCategory::Audio, "20250101-20250108");
        let sibling = make_folder(&roots, ArtifactCategory::Audio, "20250201-20250208");
        let transcript = make_folder(&roots, ArtifactCategory::Transcripts, "20250101-20250108");

        let retention = RetentionConfig {
            audio_months: 1,
            transcripts_months: 1,
            reports_months: 0,
        };
        let report = clean_with(&retention, &roots, date(2026, 1, 10), |path| {
            if path == stuck {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "file in use"))
            } else {
                remove_artifact(path)
            }
        });

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, stuck);
        assert!(report.failures[0].error.contains("file in use"));
        assert!(!report.is_clean());
        assert_eq!(report.deleted.len(), 2);
        assert!(stuck.exists());
        assert!(!sibling.exists());
        assert!(!transcript.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_root_is_reported_and_other_categories_still_clean() {
        let (dir, roots) = temp_roots();
        std::fs::create_dir_all(&dir).expect("mkdir");
        // A regular file where the audio directory should be.
        std::fs::write(roots.root(ArtifactCategory::Audio), b"not a dir").expect("write");
        let report_dir = make_folder(&roots, ArtifactCategory::Reports, "20250101-20250108");

        let retention = RetentionConfig {
            audio_months: 1,
            transcripts_months: 1,
            reports_months: 1,
        };
        let report = clean(&retention, &roots, date(2026, 1, 10));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, roots.root(ArtifactCategory::Audio));
        assert_eq!(report.deleted, vec![report_dir.clone()]);
        assert!(!report_dir.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_roots_are_not_failures() {
        let (_dir, roots) = temp_roots();
        let report = clean(&RetentionConfig::default(), &roots, date(2026, 1, 1));
        assert_eq!(report, CleanupReport::default());
    }
}
