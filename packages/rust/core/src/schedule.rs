//! Management of the single crontab line that runs the weekly pipeline.
//!
//! The line is identified by [`MARKER`]. Installing removes every marked line
//! before appending a new one, so repeated installs leave exactly one entry.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;

use serde::Serialize;
use swr_shared::{Result, SwrError};
use tracing::{debug, info, instrument};

/// Comment appended to the managed crontab line.
pub const MARKER: &str = "# swr:stock-weekly-report";

/// Sundays at 08:00.
pub const DEFAULT_SCHEDULE: &str = "0 8 * * 0";

const CRON_MACROS: &[&str] = &[
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

// ---------------------------------------------------------------------------
// CronExpression
// ---------------------------------------------------------------------------

/// A validated five-field cron schedule or an `@` macro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CronExpression(String);

impl CronExpression {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of whitespace-separated tokens the expression occupies in a crontab line.
    fn token_count(&self) -> usize {
        self.0.split_whitespace().count()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CronExpression {
    type Err = SwrError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let invalid = |why: &str| SwrError::validation(format!("invalid cron expression '{s}': {why}"));

        match fields.as_slice() {
            [single] if single.starts_with('@') => {
                if CRON_MACROS.contains(&single.to_ascii_lowercase().as_str()) {
                    Ok(Self(single.to_string()))
                } else {
                    Err(invalid("unknown @ macro"))
                }
            }
            [minute, hour, dom, month, dow] => {
                check_field(minute, 0, 59, &[]).map_err(|e| invalid(&format!("minute {e}")))?;
                check_field(hour, 0, 23, &[]).map_err(|e| invalid(&format!("hour {e}")))?;
                check_field(dom, 1, 31, &[]).map_err(|e| invalid(&format!("day-of-month {e}")))?;
                check_field(month, 1, 12, MONTH_NAMES).map_err(|e| invalid(&format!("month {e}")))?;
                check_field(dow, 0, 7, DAY_NAMES).map_err(|e| invalid(&format!("day-of-week {e}")))?;
                Ok(Self(fields.join(" ")))
            }
            _ => Err(invalid("expected 5 fields")),
        }
    }
}

/// Validate one cron field: `*`, values, ranges, lists, and `/step`.
fn check_field(field: &str, min: u32, max: u32, names: &[&str]) -> std::result::Result<(), String> {
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };
        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(format!("has invalid step '{step}'")),
            }
        }
        if base == "*" {
            continue;
        }
        let (lo, hi) = match base.split_once('-') {
            Some((lo, hi)) => (lo, Some(hi)),
            None => (base, None),
        };
        let lo = field_value(lo, min, max, names)?;
        if let Some(hi) = hi {
            let hi = field_value(hi, min, max, names)?;
            if lo > hi {
                return Err(format!("has reversed range '{base}'"));
            }
        }
    }
    Ok(())
}

fn field_value(raw: &str, min: u32, max: u32, names: &[&str]) -> std::result::Result<u32, String> {
    if let Ok(n) = raw.parse::<u32>() {
        return if (min..=max).contains(&n) {
            Ok(n)
        } else {
            Err(format!("value {n} outside {min}-{max}"))
        };
    }
    let lower = raw.to_ascii_lowercase();
    names
        .iter()
        .position(|name| *name == lower)
        .map(|idx| idx as u32 + min)
        .ok_or_else(|| format!("has invalid value '{raw}'"))
}

// ---------------------------------------------------------------------------
// CronTable
// ---------------------------------------------------------------------------

/// The user's schedule table, read and written as whole lines.
pub trait CronTable: Send + Sync {
    fn read(&self) -> Result<Vec<String>>;
    fn write(&self, lines: &[String]) -> Result<()>;
}

/// The real table, via the `crontab` binary.
#[derive(Debug, Clone, Default)]
pub struct SystemCrontab;

impl CronTable for SystemCrontab {
    fn read(&self) -> Result<Vec<String>> {
        let output = Command::new("crontab")
            .arg("-l")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SwrError::ScheduleUnavailable(format!("failed to run crontab: {e}")))?;

        // "no crontab for <user>" exits non-zero.
        if !output.status.success() {
            debug!(status = %output.status, "crontab -l failed, treating as empty");
            return Ok(Vec::new());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn write(&self, lines: &[String]) -> Result<()> {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SwrError::ScheduleUnavailable(format!("failed to run crontab: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .map_err(|e| SwrError::ScheduleUnavailable(format!("failed to write crontab: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| SwrError::ScheduleUnavailable(format!("crontab did not finish: {e}")))?;
        if !output.status.success() {
            return Err(SwrError::ScheduleUnavailable(format!(
                "crontab rejected the table ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScheduleManager
// ---------------------------------------------------------------------------

/// What `status` found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    pub installed: bool,
    pub expression: Option<CronExpression>,
    /// Command part of the managed line.
    pub command: Option<String>,
}

/// Installs, removes, and inspects the managed crontab line.
pub struct ScheduleManager<T: CronTable> {
    table: T,
    command: String,
}

impl<T: CronTable> ScheduleManager<T> {
    /// `command` is what the managed line runs, e.g. [`wrapper_command`].
    pub fn new(table: T, command: impl Into<String>) -> Self {
        Self {
            table,
            command: command.into(),
        }
    }

    /// Replace any managed line with one running on `expression`.
    #[instrument(skip(self))]
    pub fn install(&self, expression: &str) -> Result<CronExpression> {
        let expression: CronExpression = expression.parse()?;

        let mut lines = self.table.read()?;
        lines.retain(|line| !line.contains(MARKER));
        lines.push(format!("{expression} {}  {MARKER}", self.command));
        self.table.write(&lines)?;

        info!(%expression, "schedule installed");
        Ok(expression)
    }

    /// Drop the managed line. Returns whether one existed.
    pub fn remove(&self) -> Result<bool> {
        let mut lines = self.table.read()?;
        let before = lines.len();
        lines.retain(|line| !line.contains(MARKER));
        if lines.len() == before {
            return Ok(false);
        }
        self.table.write(&lines)?;
        info!("schedule removed");
        Ok(true)
    }

    pub fn status(&self) -> Result<ScheduleStatus> {
        let lines = self.table.read()?;
        let Some(line) = lines.iter().find(|line| line.contains(MARKER)) else {
            return Ok(ScheduleStatus {
                installed: false,
                expression: None,
                command: None,
            });
        };

        let (expression, command) = parse_managed_line(line);
        Ok(ScheduleStatus {
            installed: true,
            expression,
            command,
        })
    }
}

/// Split a managed line into its schedule and command.
fn parse_managed_line(line: &str) -> (Option<CronExpression>, Option<String>) {
    let body = line.split(MARKER).next().unwrap_or(line).trim();
    let tokens: Vec<&str> = body.split_whitespace().collect();
    let width = if tokens.first().is_some_and(|t| t.starts_with('@')) { 1 } else { 5 };
    if tokens.len() < width {
        return (None, None);
    }

    let expression = tokens[..width].join(" ").parse::<CronExpression>().ok();
    let command = expression.as_ref().and_then(|expr| {
        let mut rest = body;
        for _ in 0..expr.token_count() {
            rest = rest.trim_start();
            rest = rest
                .find(char::is_whitespace)
                .map_or("", |idx| &rest[idx..]);
        }
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    });
    (expression, command)
}

// ---------------------------------------------------------------------------
// Wrapper script
// ---------------------------------------------------------------------------

/// Crontab command invoking the wrapper with output discarded.
pub fn wrapper_command(script: &Path) -> String {
    format!("{} > /dev/null 2>&1", sh_quote(&script.to_string_lossy()))
}

/// Write the script the managed line runs.
///
/// The script runs `<binary> --config <config> run`, appending a start line,
/// the pipeline output, and an end line with the exit code to `log_path`.
pub fn write_wrapper_script(path: &Path, binary: &Path, config_path: &Path, log_path: &Path) -> Result<()> {
    let log = sh_quote(&log_path.to_string_lossy());
    let binary = sh_quote(&binary.to_string_lossy());
    let config = sh_quote(&config_path.to_string_lossy());

    let script = format!(
        r#"#!/bin/sh
# Generated by `swr cron install`. Runs the weekly pipeline.
export PATH="$HOME/.local/bin:/usr/local/bin:/opt/homebrew/bin:$PATH"
LOG={log}
mkdir -p "$(dirname "$LOG")"
echo "=== $(date '+%Y-%m-%d %H:%M:%S') pipeline start ===" >> "$LOG"
{binary} --config {config} run >> "$LOG" 2>&1
status=$?
echo "=== $(date '+%Y-%m-%d %H:%M:%S') pipeline end (exit $status) ===" >> "$LOG"
exit $status
"#
    );

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SwrError::io(parent, e))?;
    }
    std::fs::write(path, script).map_err(|e| SwrError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| SwrError::io(path, e))?;
    }

    debug!(path = ?path, "wrapper script written");
    Ok(())
}

/// Single-quote `s` for `/bin/sh` when it needs quoting.
fn sh_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
