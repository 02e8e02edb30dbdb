//! Frame planning and extraction for the visual analysis stage.

use std::path::{Path, PathBuf};

use reeldigest_shared::{ReelDigestError, Result};
use tracing::{debug, warn};

use crate::probe::DEFAULT_DURATION_SECS;
use crate::process::run_tool;

/// A still image taken from the media, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameExtract {
    pub offset_secs: f64,
    pub path: PathBuf,
}

/// How many frames to sample for a clip of `duration_secs`.
///
/// Short clips get fewer frames; the result is clamped to `[min, max]`.
pub fn frame_count_for(duration_secs: f64, min: u32, max: u32) -> u32 {
    let base = if duration_secs <= 30.0 {
        8
    } else if duration_secs <= 60.0 {
        9
    } else {
        10
    };
    base.clamp(min, max.max(min))
}

/// Offsets spread evenly from the start of the clip: `i / count * duration`.
pub fn plan_frame_offsets(duration_secs: Option<f64>, min: u32, max: u32) -> Vec<f64> {
    let duration = duration_secs
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(DEFAULT_DURATION_SECS);
    let count = frame_count_for(duration, min, max);
    (0..count)
        .map(|i| {
            let offset = f64::from(i) / f64::from(count) * duration;
            (offset * 10.0).round() / 10.0
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FrameExtractor {
    ffmpeg: String,
}

impl FrameExtractor {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Grab one JPEG per offset into `out_dir`.
    ///
    /// A frame ffmpeg cannot produce is skipped; getting none at all is an
    /// analyze error.
    pub async fn extract(
        &self,
        video: &Path,
        offsets: &[f64],
        out_dir: &Path,
    ) -> Result<Vec<FrameExtract>> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| ReelDigestError::io(out_dir, e))?;

        let mut frames = Vec::with_capacity(offsets.len());
        let mut last_error = None;

        for (i, offset) in offsets.iter().enumerate() {
            let path = out_dir.join(format!("frame_{i:02}.jpg"));
            let args = vec![
                "-hide_banner".to_string(),
                "-loglevel".into(),
                "error".into(),
                "-ss".into(),
                format!("{offset:.2}"),
                "-i".into(),
                video.to_string_lossy().into_owned(),
                "-frames:v".into(),
                "1".into(),
                "-q:v".into(),
                "2".into(),
                "-y".into(),
                path.to_string_lossy().into_owned(),
            ];
            match run_tool(&self.ffmpeg, &args, None, None).await {
                Ok(_) if path.exists() => {
                    debug!(offset, path = %path.display(), "frame extracted");
                    frames.push(FrameExtract {
                        offset_secs: *offset,
                        path,
                    });
                }
                Ok(_) => {
                    warn!(offset, "ffmpeg produced no frame");
                }
                Err(e) => {
                    warn!(offset, error = %e, "frame extraction failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        if frames.is_empty() {
            return Err(ReelDigestError::Analyze(format!(
                "no frames extracted from {}: {}",
                video.display(),
                last_error.unwrap_or_else(|| "empty output".into())
            )));
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_scales_with_duration() {
        assert_eq!(frame_count_for(15.0, 8, 10), 8);
        assert_eq!(frame_count_for(30.0, 8, 10), 8);
        assert_eq!(frame_count_for(45.0, 8, 10), 9);
        assert_eq!(frame_count_for(60.0, 8, 10), 9);
        assert_eq!(frame_count_for(600.0, 8, 10), 10);
    }

    #[test]
    fn frame_count_respects_configured_bounds() {
        assert_eq!(frame_count_for(600.0, 4, 6), 6);
        assert_eq!(frame_count_for(5.0, 9, 12), 9);
    }

    #[test]
    fn offsets_are_ascending_and_inside_clip() {
        let offsets = plan_frame_offsets(Some(30.0), 8, 10);
        assert_eq!(offsets.len(), 8);
        assert_eq!(offsets[0], 0.0);
        assert_eq!(offsets[1], 3.8);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert!(offsets.iter().all(|o| *o < 30.0));
    }

    #[test]
    fn unknown_duration_uses_default() {
        assert_eq!(plan_frame_offsets(None, 8, 10), plan_frame_offsets(Some(30.0), 8, 10));
        assert_eq!(plan_frame_offsets(Some(f64::NAN), 8, 10).len(), 8);
    }

    #[tokio::test]
    async fn missing_ffmpeg_fails_whole_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FrameExtractor::new("reeldigest-no-such-ffmpeg");
        let err = extractor
            .extract(Path::new("clip.mp4"), &[0.0, 1.0], dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no frames extracted"));
    }
}
