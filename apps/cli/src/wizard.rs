//! Interactive prompts for `swr init`.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use color_eyre::eyre::Result;
use swr_shared::{Config, SMTP_PASSWORD_ENV, expand_home, is_valid_email};

/// Where `nlm` is usually installed when it is not on `PATH`.
const NLM_CANDIDATES: &[&str] = &["~/.local/bin/nlm", "/usr/local/bin/nlm", "/opt/homebrew/bin/nlm"];

/// Line-based prompts. End of input accepts every default.
pub(crate) struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub(crate) fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub(crate) fn say(&mut self, line: &str) -> Result<()> {
        writeln!(self.output, "{line}")?;
        Ok(())
    }

    /// Ask for a string; an empty answer keeps `default`.
    pub(crate) fn ask(&mut self, label: &str, default: &str) -> Result<String> {
        if default.is_empty() {
            write!(self.output, "{label}: ")?;
        } else {
            write!(self.output, "{label} [{default}]: ")?;
        }
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        let answer = answer.trim();
        Ok(if answer.is_empty() { default.to_string() } else { answer.to_string() })
    }

    pub(crate) fn confirm(&mut self, label: &str, default: bool) -> Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            let answer = self.ask(&format!("{label} ({hint})"), "")?;
            match answer.to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.say("  Please answer y or n.")?,
            }
        }
    }

    /// Ask for a non-negative integer, re-asking on bad input.
    pub(crate) fn ask_u32(&mut self, label: &str, default: u32) -> Result<u32> {
        loop {
            let answer = self.ask(label, &default.to_string())?;
            match answer.parse() {
                Ok(value) => return Ok(value),
                Err(_) => self.say(&format!("  '{answer}' is not a whole number."))?,
            }
        }
    }
}

/// Locate `nlm` on `PATH` or in a common install location.
pub(crate) fn detect_nlm() -> Option<PathBuf> {
    let on_path = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join("nlm"))
            .find(|candidate| candidate.is_file())
    });
    on_path.or_else(|| {
        NLM_CANDIDATES
            .iter()
            .map(|candidate| expand_home(candidate))
            .find(|candidate| candidate.is_file())
    })
}

/// Walk through the settings `init` asks about, starting from `config`.
pub(crate) fn configure<R: BufRead, W: Write>(
    prompt: &mut Prompter<R, W>,
    mut config: Config,
) -> Result<Config> {
    prompt.say("\n=== Stock Weekly Report: setup ===\n")?;

    config.parent_folder = prompt.ask("Data folder", &config.parent_folder)?;

    // nlm is only needed by the upload and report stages.
    let saved_nlm = Path::new(&config.nlm_path);
    let default_nlm = if saved_nlm.is_absolute() && saved_nlm.is_file() {
        config.nlm_path.clone()
    } else {
        detect_nlm()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.nlm_path.clone())
    };
    let nlm = prompt.ask("nlm binary path", &default_nlm)?;
    let nlm_expanded = expand_home(&nlm);
    if nlm_expanded.is_file() {
        prompt.say(&format!("  ✓ nlm found at {}", nlm_expanded.display()))?;
    } else {
        prompt.say("  ! nlm not found there; use `swr run --skip-upload` until it is installed")?;
    }
    config.nlm_path = nlm_expanded.to_string_lossy().into_owned();

    loop {
        let from = prompt.ask("Sender email", &config.email.from_addr)?;
        if from.is_empty() || is_valid_email(&from) {
            config.email.from_addr = from;
            break;
        }
        prompt.say(&format!("  ! '{from}' is not a valid address"))?;
    }

    let recipients = prompt.ask("Recipient email(s), comma-separated", &config.email.to.join(", "))?;
    let mut to: Vec<String> = Vec::new();
    for addr in recipients.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        if !is_valid_email(addr) {
            prompt.say(&format!("  ! skipping invalid address '{addr}'"))?;
        } else if to.iter().any(|a| a.eq_ignore_ascii_case(addr)) {
            prompt.say(&format!("  ! skipping duplicate '{addr}'"))?;
        } else {
            to.push(addr.to_string());
        }
    }
    config.email.to = to;

    if std::env::var_os(SMTP_PASSWORD_ENV).is_none() && config.email.smtp_password.is_empty() {
        prompt.say(&format!(
            "  Set {SMTP_PASSWORD_ENV} in your shell profile before the email stage runs."
        ))?;
    }

    prompt.say("\n--- Retention (months, 0 = keep forever) ---")?;
    config.retention.audio_months = prompt.ask_u32("Keep audio for", config.retention.audio_months)?;
    config.retention.transcripts_months =
        prompt.ask_u32("Keep transcripts for", config.retention.transcripts_months)?;
    config.retention.reports_months = prompt.ask_u32("Keep reports for", config.retention.reports_months)?;

    Ok(config)
}
