//! Weekly report composition and storage.

use std::path::{Path, PathBuf};

use serde::Serialize;
use swr_notebook::notebook_url;
use swr_shared::{ArtifactCategory, ArtifactRoots, FolderId, ReportSection, Result, SwrError};
use tracing::{info, warn};

/// Text used in place of a section whose query failed.
pub const SECTION_PLACEHOLDER: &str =
    "(This section could not be generated. Open the notebook to read it directly.)";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// File that records which notebook an upload produced for a folder.
pub const NOTEBOOK_ID_FILE: &str = "notebook_id";

/// A finished report, ready to save or mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub subject: String,
    pub body: String,
}

/// Ask every section's question and join the answers under their titles.
///
/// A failed question is logged and replaced with [`SECTION_PLACEHOLDER`].
pub fn compose_sections(
    sections: &[ReportSection],
    mut ask: impl FnMut(&str) -> Result<String>,
) -> String {
    let total = sections.len();
    sections
        .iter()
        .enumerate()
        .map(|(idx, section)| {
            info!(current = idx + 1, total, title = %section.title, "querying section");
            let answer = match ask(&section.question) {
                Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
                Ok(_) => {
                    warn!(title = %section.title, "empty answer");
                    SECTION_PLACEHOLDER.to_string()
                }
                Err(e) => {
                    warn!(title = %section.title, error = %e, "section query failed");
                    SECTION_PLACEHOLDER.to_string()
                }
            };
            format!("## {}\n\n{answer}", section.title)
        })
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

/// Reject summaries that are empty or shorter than `min_chars`.
pub fn validate_summary(summary: &str, min_chars: usize) -> Result<()> {
    let chars = summary.trim().chars().count();
    if chars == 0 {
        return Err(SwrError::stage("report", "report is empty"));
    }
    if chars < min_chars {
        return Err(SwrError::stage(
            "report",
            format!(
                "report is suspiciously short ({chars} chars < {min_chars}); \
                 the notebook may still be processing its sources"
            ),
        ));
    }
    Ok(())
}

/// Mail subject: `<prefix>｜YYYY/MM/DD – YYYY/MM/DD`.
pub fn subject(prefix: &str, folder: &FolderId) -> String {
    format!("{prefix}｜{}", folder.display_range())
}

/// Plain-text body: the summary followed by a link to the notebook.
pub fn body(summary: &str, notebook_id: &str) -> String {
    format!(
        "{summary}\n\n{}\nFull notebook: {}\n\n(Generated automatically by swr)\n",
        "-".repeat(60),
        notebook_url(notebook_id)
    )
}

/// `reports/<folder>/weekly_report_<folder>.txt`
pub fn report_path(roots: &ArtifactRoots, folder: &FolderId) -> PathBuf {
    roots
        .folder(ArtifactCategory::Reports, folder)
        .join(format!("weekly_report_{folder}.txt"))
}

/// Write the report body to its standard location.
pub fn save(roots: &ArtifactRoots, folder: &FolderId, report: &Report) -> Result<PathBuf> {
    let path = report_path(roots, folder);
    write_in_folder(&path, &report.body)?;
    info!(path = ?path, "report saved");
    Ok(path)
}

/// Remember the notebook an upload produced, for later runs that skip upload.
pub fn record_notebook_id(roots: &ArtifactRoots, folder: &FolderId, notebook_id: &str) -> Result<()> {
    let path = roots
        .folder(ArtifactCategory::Reports, folder)
        .join(NOTEBOOK_ID_FILE);
    write_in_folder(&path, notebook_id)
}

/// Notebook recorded by an earlier upload for this folder, if any.
pub fn recorded_notebook_id(roots: &ArtifactRoots, folder: &FolderId) -> Option<String> {
    let path = roots
        .folder(ArtifactCategory::Reports, folder)
        .join(NOTEBOOK_ID_FILE);
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn write_in_folder(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SwrError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| SwrError::io(path, e))
}
