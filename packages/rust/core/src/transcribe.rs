//! Speech-to-text over a run's audio folder.
//!
//! Each audio file becomes `<transcripts>/<folder>/<stem>.txt`. Existing
//! transcripts that pass verification are kept, so an interrupted run can
//! be resumed without redoing finished files.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use swr_shared::{Result, RetryPolicy, SwrError};
use tracing::{debug, info, instrument, warn};

/// Transcripts shorter than this (after trimming) are treated as failures.
pub const MIN_TRANSCRIPT_CHARS: usize = 50;

/// Audio file extensions picked up from the audio folder.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "aac", "wav", "flac", "opus"];

/// A speech-to-text engine.
pub trait SpeechEngine: Send + Sync {
    /// Transcribe one audio file and return its text.
    fn transcribe(&self, audio: &Path) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Whisper CLI engine
// ---------------------------------------------------------------------------

/// Runs the `whisper` command-line tool.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    pub command: String,
    pub model: String,
    pub language: String,
}

impl SpeechEngine for WhisperCli {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        let scratch = std::env::temp_dir().join(format!("swr-whisper-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&scratch).map_err(|e| SwrError::io(&scratch, e))?;

        let result = self.run_into(audio, &scratch);
        let _ = std::fs::remove_dir_all(&scratch);
        result
    }
}

impl WhisperCli {
    fn run_into(&self, audio: &Path, out_dir: &Path) -> Result<String> {
        debug!(command = %self.command, audio = ?audio, "running whisper");
        let output = Command::new(&self.command)
            .arg(audio)
            .args(["--model", &self.model])
            .args(["--language", &self.language])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(out_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SwrError::stage(
                    "transcribe",
                    format!("failed to run `{}`: {e}. Is whisper installed?", self.command),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(SwrError::stage(
                "transcribe",
                format!("{} exited with {}: {tail}", self.command, output.status),
            ));
        }

        let stem = audio.file_stem().unwrap_or_default().to_string_lossy();
        let produced = out_dir.join(format!("{stem}.txt"));
        std::fs::read_to_string(&produced).map_err(|e| SwrError::io(produced, e))
    }
}

// ---------------------------------------------------------------------------
// Folder transcription
// ---------------------------------------------------------------------------

/// Outcome of transcribing one run folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscribeSummary {
    /// Newly written transcripts.
    pub transcribed: Vec<PathBuf>,
    /// Audio files whose existing transcript was kept.
    pub skipped: usize,
    /// Audio files without a valid transcript after the run, with the reason.
    pub invalid: Vec<(String, String)>,
    /// Transcripts that pass verification.
    pub valid: Vec<PathBuf>,
}

/// Audio files in `dir`, sorted by name.
pub fn find_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = list_dir(dir)?
        .into_iter()
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Why a transcript is unusable, or `None` if it is fine.
pub fn verify_transcript(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some("file missing".into()),
        Err(e) => Some(format!("unreadable: {e}")),
        Ok(text) => {
            let chars = text.trim().chars().count();
            (chars < MIN_TRANSCRIPT_CHARS)
                .then(|| format!("too short ({chars} chars < {MIN_TRANSCRIPT_CHARS})"))
        }
    }
}

/// Transcribe every audio file of `audio_dir` into `transcript_dir`.
///
/// Failing files are retried per `retry`. The call fails only when there is
/// no audio at all or no file ends up with a valid transcript.
#[instrument(skip_all, fields(audio_dir = ?audio_dir))]
pub fn transcribe_folder(
    engine: &dyn SpeechEngine,
    audio_dir: &Path,
    transcript_dir: &Path,
    retry: &RetryPolicy,
) -> Result<TranscribeSummary> {
    if !audio_dir.is_dir() {
        return Err(SwrError::stage(
            "transcribe",
            format!("audio folder not found: {}", audio_dir.display()),
        ));
    }
    let audio_files = find_audio_files(audio_dir)?;
    if audio_files.is_empty() {
        return Err(SwrError::stage(
            "transcribe",
            format!("no audio files in {}", audio_dir.display()),
        ));
    }
    std::fs::create_dir_all(transcript_dir).map_err(|e| SwrError::io(transcript_dir, e))?;

    let mut summary = TranscribeSummary::default();
    let total = audio_files.len();

    for (idx, audio) in audio_files.iter().enumerate() {
        let transcript = transcript_path(transcript_dir, audio);
        let name = audio.file_name().unwrap_or_default().to_string_lossy().into_owned();

        if transcript.exists() {
            match verify_transcript(&transcript) {
                None => {
                    debug!(file = %name, "valid transcript exists");
                    summary.skipped += 1;
                    continue;
                }
                Some(reason) => info!(file = %name, %reason, "re-transcribing"),
            }
        }

        info!(current = idx + 1, total, file = %name, "transcribing");
        let attempt = retry.run(&name, |_| {
            let text = engine.transcribe(audio)?;
            let chars = text.trim().chars().count();
            if chars < MIN_TRANSCRIPT_CHARS {
                return Err(SwrError::stage(
                    "transcribe",
                    format!("{name}: only {chars} chars of text"),
                ));
            }
            std::fs::write(&transcript, &text).map_err(|e| SwrError::io(&transcript, e))
        });

        match attempt {
            Ok(()) => summary.transcribed.push(transcript),
            Err(e) => {
                warn!(file = %name, error = %e, "transcription failed");
                let _ = std::fs::remove_file(&transcript);
            }
        }
    }

    for audio in &audio_files {
        let transcript = transcript_path(transcript_dir, audio);
        match verify_transcript(&transcript) {
            None => summary.valid.push(transcript),
            Some(reason) => {
                let name = audio.file_name().unwrap_or_default().to_string_lossy().into_owned();
                warn!(file = %name, %reason, "transcript failed verification");
                summary.invalid.push((name, reason));
            }
        }
    }

    info!(
        transcribed = summary.transcribed.len(),
        skipped = summary.skipped,
        invalid = summary.invalid.len(),
        "transcription completed"
    );

    if summary.valid.is_empty() {
        return Err(SwrError::stage(
            "transcribe",
            format!("none of {total} audio files produced a valid transcript"),
        ));
    }
    Ok(summary)
}

/// Transcript files in `dir`, sorted by name.
pub fn find_transcripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = list_dir(dir)?
        .into_iter()
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "txt"))
        .collect();
    files.sort();
    Ok(files)
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::read_dir(dir)
        .and_then(|entries| entries.map(|e| e.map(|e| e.path())).collect::<std::io::Result<Vec<_>>>())
        .map_err(|e| SwrError::io(dir, e))
}

fn transcript_path(transcript_dir: &Path, audio: &Path) -> PathBuf {
    let stem = audio.file_stem().unwrap_or_default().to_string_lossy();
    transcript_dir.join(format!("{stem}.txt"))
}
