//! ffprobe wrapper: duration and audio-track detection.

use std::path::Path;

use reeldigest_shared::{ReelDigestError, Result};

use crate::process::run_tool;

/// Duration assumed when a container does not report one.
pub const DEFAULT_DURATION_SECS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct Ffprobe {
    command: String,
}

impl Ffprobe {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Container duration in seconds.
    pub async fn duration(&self, path: &Path) -> Result<f64> {
        let args = vec![
            "-v".to_string(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            path.to_string_lossy().into_owned(),
        ];
        let out = run_tool(&self.command, &args, None, None)
            .await
            .map_err(|e| ReelDigestError::Analyze(e.to_string()))?;
        parse_duration(&out.stdout).ok_or_else(|| {
            ReelDigestError::Analyze(format!(
                "ffprobe reported no duration for {}",
                path.display()
            ))
        })
    }

    /// Whether the file carries at least one audio stream.
    pub async fn has_audio(&self, path: &Path) -> Result<bool> {
        let args = vec![
            "-v".to_string(),
            "error".into(),
            "-select_streams".into(),
            "a".into(),
            "-show_entries".into(),
            "stream=index".into(),
            "-of".into(),
            "csv=p=0".into(),
            path.to_string_lossy().into_owned(),
        ];
        let out = run_tool(&self.command, &args, None, None)
            .await
            .map_err(|e| ReelDigestError::Transcribe(e.to_string()))?;
        Ok(!out.stdout.trim().is_empty())
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}
