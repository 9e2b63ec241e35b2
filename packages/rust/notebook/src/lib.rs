//! Wrapper around the `nlm` notebook CLI.
//!
//! Every operation shells out to `nlm` and parses its JSON output. The
//! client is blocking; callers run it off the async executor.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use serde_json::Value;
use swr_shared::{Result, RetryPolicy, SwrError};
use tracing::{debug, info, instrument, warn};

/// Base URL for opening a notebook in the browser.
pub const NOTEBOOK_URL_BASE: &str = "https://notebooklm.google.com/notebook/";

/// Browser link for a notebook.
pub fn notebook_url(notebook_id: &str) -> String {
    format!("{NOTEBOOK_URL_BASE}{notebook_id}")
}

/// A notebook as listed by `nlm notebook list --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotebookInfo {
    pub id: String,
    pub title: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle to the `nlm` executable.
#[derive(Debug, Clone)]
pub struct NlmClient {
    program: PathBuf,
    retry: RetryPolicy,
}

impl NlmClient {
    pub fn new(program: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            program: program.into(),
            retry,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Fail unless `nlm` is installed and logged in.
    pub fn check_login(&self) -> Result<()> {
        self.exec(&["login", "--check"]).map_err(|e| match e {
            SwrError::Stage { message, .. } => SwrError::stage(
                "nlm",
                format!("not authenticated ({message}); run `nlm login`"),
            ),
            other => other,
        })?;
        Ok(())
    }

    pub fn list_notebooks(&self) -> Result<Vec<NotebookInfo>> {
        let out = self
            .retry
            .run("nlm notebook list", |_| self.exec(&["notebook", "list", "--json"]))?;
        parse_notebook_list(&out)
    }

    /// Id of the first notebook whose title matches, ignoring surrounding whitespace.
    pub fn find_by_title(&self, title: &str) -> Result<Option<String>> {
        Ok(self
            .list_notebooks()?
            .into_iter()
            .find(|nb| nb.title.trim() == title.trim())
            .map(|nb| nb.id))
    }

    pub fn delete_notebook(&self, notebook_id: &str) -> Result<()> {
        self.exec(&["notebook", "delete", notebook_id])?;
        Ok(())
    }

    /// Create a notebook and return its id.
    pub fn create_notebook(&self, title: &str) -> Result<String> {
        let out = self.exec(&["notebook", "create", title, "--json"])?;
        parse_notebook_id(&out)
    }

    /// Add a local file as a source, waiting for processing to finish.
    pub fn add_source(&self, notebook_id: &str, file: &Path) -> Result<()> {
        let file = file.to_string_lossy();
        self.exec(&["source", "add", notebook_id, "--file", &file, "--wait"])?;
        Ok(())
    }

    /// Request a "Briefing Doc" artifact inside the notebook.
    pub fn create_briefing_doc(&self, notebook_id: &str, language: &str) -> Result<()> {
        self.exec(&[
            "report",
            "create",
            notebook_id,
            "--format",
            "Briefing Doc",
            "--language",
            language,
            "--confirm",
        ])?;
        Ok(())
    }

    /// Ask the notebook a question and return the answer text.
    pub fn query(&self, notebook_id: &str, question: &str) -> Result<String> {
        let out = self
            .retry
            .run("nlm query", |_| self.exec(&["query", "notebook", notebook_id, question]))?;
        Ok(extract_answer(&out))
    }

    /// Replace any notebook titled `title` with a fresh one holding `files`.
    ///
    /// Per-file upload failures are logged; the call fails only if no file
    /// could be added.
    #[instrument(skip_all, fields(title = %title, files = files.len()))]
    pub fn publish(&self, title: &str, files: &[PathBuf]) -> Result<String> {
        if files.is_empty() {
            return Err(SwrError::stage("nlm", "no transcripts to upload"));
        }

        self.check_login()?;

        match self.find_by_title(title) {
            Ok(Some(stale)) => {
                info!(notebook_id = %stale, "deleting stale notebook");
                if let Err(e) = self.delete_notebook(&stale) {
                    warn!(notebook_id = %stale, error = %e, "could not delete stale notebook");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not list notebooks"),
        }

        let notebook_id = self.create_notebook(title)?;
        info!(notebook_id = %notebook_id, "notebook created");

        let mut added = 0;
        for (idx, file) in files.iter().enumerate() {
            debug!(current = idx + 1, total = files.len(), file = ?file, "adding source");
            match self.add_source(&notebook_id, file) {
                Ok(()) => added += 1,
                Err(e) => warn!(file = ?file, error = %e, "source upload failed"),
            }
        }

        if added == 0 {
            return Err(SwrError::stage(
                "nlm",
                format!("none of {} transcripts could be uploaded", files.len()),
            ));
        }
        info!(added, total = files.len(), "sources uploaded");
        Ok(notebook_id)
    }

    /// Run `nlm <args>` and return stdout; non-zero exit is an error.
    fn exec(&self, args: &[&str]) -> Result<String> {
        debug!(program = ?self.program, ?args, "running nlm");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SwrError::stage(
                    "nlm",
                    format!("failed to run {:?}: {e}. Is nlm installed?", self.program),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(SwrError::stage(
                "nlm",
                format!(
                    "`nlm {}` failed ({}): {}",
                    args.first().copied().unwrap_or_default(),
                    output.status,
                    if stderr.is_empty() { "(no stderr)" } else { stderr }
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Parse `notebook list --json`: a bare list or `{"notebooks": [...]}`.
pub fn parse_notebook_list(raw: &str) -> Result<Vec<NotebookInfo>> {
    let data: Value = serde_json::from_str(raw.trim())
        .map_err(|e| SwrError::stage("nlm", format!("invalid notebook list JSON: {e}")))?;

    let items = match &data {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("notebooks")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let id = string_field(item, &["notebook_id", "id"])?;
            let title = string_field(item, &["title", "name"]).unwrap_or_default();
            Some(NotebookInfo { id, title })
        })
        .collect())
}

/// Parse the id out of `notebook create --json`.
pub fn parse_notebook_id(raw: &str) -> Result<String> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .and_then(|data| string_field(&data, &["notebook_id", "id"]))
        .ok_or_else(|| {
            SwrError::stage(
                "nlm",
                format!("could not parse notebook id from: {}", raw.trim()),
            )
        })
}

/// Answer text from `query notebook`: `value.answer`, then `answer`, then the raw output.
pub fn extract_answer(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(data) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    data.get("value")
        .and_then(|v| v.get("answer"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| data.get("answer").and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or(raw)
        .trim()
        .to_string()
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notebook_list_shapes() {
        let bare = r#"[{"id": "nb1", "title": "股市週報 20260218-20260225"}, {"notebook_id": "nb2", "name": "Other"}]"#;
        let listed = parse_notebook_list(bare).expect("parse");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1], NotebookInfo { id: "nb2".into(), title: "Other".into() });

        let wrapped = r#"{"notebooks": [{"notebook_id": "nb3", "title": "T"}]}"#;
        assert_eq!(parse_notebook_list(wrapped).expect("parse")[0].id, "nb3");

        assert!(parse_notebook_list(r#"{"count": 0}"#).expect("parse").is_empty());
        assert!(parse_notebook_list("not json").is_err());
    }

    #[test]
    fn notebook_id_from_create() {
        assert_eq!(parse_notebook_id(r#"{"notebook_id": "abc"}"#).expect("id"), "abc");
        assert_eq!(parse_notebook_id(r#"{"id": "xyz", "title": "T"}"#).expect("id"), "xyz");
        assert!(parse_notebook_id(r#"{"title": "T"}"#).is_err());
    }

    #[test]
    fn answer_extraction_fallbacks() {
        assert_eq!(extract_answer(r#"{"value": {"answer": " Rates fell. "}}"#), "Rates fell.");
        assert_eq!(extract_answer(r#"{"answer": "Flat week"}"#), "Flat week");
        assert_eq!(extract_answer("plain text answer\n"), "plain text answer");
        assert_eq!(extract_answer(r#"{"other": 1}"#), r#"{"other": 1}"#);
    }

    #[test]
    fn notebook_links() {
        assert_eq!(notebook_url("nb1"), "https://notebooklm.google.com/notebook/nb1");
    }

    #[test]
    fn missing_binary_is_a_stage_error() {
        let client = NlmClient::new("/nonexistent/swr-test-nlm", RetryPolicy::none());
        let err = client.check_login().unwrap_err();
        assert!(matches!(err, SwrError::Stage { .. }), "{err}");
    }

    #[cfg(unix)]
    fn fake_nlm(script: &str) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("swr-nlm-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("nlm");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        (dir, path)
    }

    #[cfg(unix)]
    #[test]
    fn publish_replaces_stale_notebook() {
        let (dir, nlm) = fake_nlm(
            r#"LOG="$(dirname "$0")/calls.log"
echo "$*" >> "$LOG"
case "$1 $2" in
  "login --check") exit 0 ;;
  "notebook list") echo '[{"id":"old","title":"Weekly 20260218-20260225"}]' ;;
  "notebook delete") exit 0 ;;
  "notebook create") echo '{"notebook_id":"fresh"}' ;;
  "source add") exit 0 ;;
  *) exit 1 ;;
esac"#,
        );
        let transcript = dir.join("a.txt");
        std::fs::write(&transcript, "text").expect("write transcript");

        let client = NlmClient::new(&nlm, RetryPolicy::none());
        let id = client
            .publish("Weekly 20260218-20260225", &[transcript])
            .expect("publish");
        assert_eq!(id, "fresh");

        let calls = std::fs::read_to_string(dir.join("calls.log")).expect("calls");
        assert!(calls.contains("notebook delete old"));
        assert!(calls.contains("source add fresh --file"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn publish_requires_login() {
        let (dir, nlm) = fake_nlm("echo 'expired' >&2\nexit 3");
        let transcript = dir.join("a.txt");
        std::fs::write(&transcript, "text").expect("write transcript");

        let client = NlmClient::new(&nlm, RetryPolicy::none());
        let err = client.publish("T", &[transcript]).unwrap_err();
        assert!(err.to_string().contains("nlm login"), "{err}");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
