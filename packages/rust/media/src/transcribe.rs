//! Speech-to-text through the whisper.cpp command line tool.
//!
//! The audio track is first resampled to 16 kHz mono WAV with ffmpeg, which
//! is the only input whisper.cpp reads.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use reeldigest_shared::{ReelDigestError, Result};
use tracing::{debug, instrument};

use crate::process::run_tool;

#[derive(Debug, Clone)]
pub struct WhisperCli {
    command: String,
    model_path: PathBuf,
    language: String,
    ffmpeg: String,
}

impl WhisperCli {
    pub fn new(
        command: impl Into<String>,
        model_path: impl Into<PathBuf>,
        language: impl Into<String>,
        ffmpeg: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            model_path: model_path.into(),
            language: language.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Transcribe the audio in `media`. An empty string means no speech.
    #[instrument(skip_all, fields(media = %media.display()))]
    pub async fn transcribe(&self, media: &Path, work_dir: &Path) -> Result<String> {
        let wav = work_dir.join("audio_16k.wav");
        let convert = vec![
            "-hide_banner".to_string(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            media.to_string_lossy().into_owned(),
            "-vn".into(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            "-c:a".into(),
            "pcm_s16le".into(),
            "-y".into(),
            wav.to_string_lossy().into_owned(),
        ];
        run_tool(&self.ffmpeg, &convert, None, None)
            .await
            .map_err(|e| ReelDigestError::Transcribe(format!("audio conversion failed: {e}")))?;

        let args = vec![
            "-m".to_string(),
            self.model_path.to_string_lossy().into_owned(),
            "-f".into(),
            wav.to_string_lossy().into_owned(),
            "-l".into(),
            self.language.clone(),
            "--no-timestamps".into(),
            "--no-prints".into(),
        ];
        let out = run_tool(&self.command, &args, None, None)
            .await
            .map_err(|e| ReelDigestError::Transcribe(e.to_string()))?;

        let transcript = clean_transcript(&out.stdout);
        debug!(chars = transcript.chars().count(), "transcription finished");
        Ok(transcript)
    }
}

/// Drop whisper's non-speech markers and join the remaining lines.
///
/// Markers look like `[BLANK_AUDIO]`, `[Music]` or `(upbeat music)`.
pub fn clean_transcript(raw: &str) -> String {
    static MARKER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|♪+").expect("valid regex"));

    raw.lines()
        .map(|line| MARKER_RE.replace_all(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
