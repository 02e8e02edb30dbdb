//! Media acquisition through yt-dlp.
//!
//! One call downloads everything the post carries into the job's scratch
//! directory and prints the metadata as JSON. Files are discovered by
//! scanning the directory afterwards, so carousels and single videos take
//! the same path.

use std::path::{Path, PathBuf};

use reeldigest_shared::{DownloadFailure, ReelDigestError, Result};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::probe::Ffprobe;
use crate::process::{ToolError, run_tool};

/// Broad class of a downloaded file, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp4" | "webm" | "mkv" | "mov" | "m4v" => Some(Self::Video),
            "jpg" | "jpeg" | "png" | "webp" | "heic" => Some(Self::Image),
            "m4a" | "mp3" | "opus" | "ogg" | "wav" | "aac" => Some(Self::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// What the acquisition stage hands to the rest of the job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquiredMedia {
    /// Local files in gallery order.
    pub files: Vec<MediaFile>,
    pub title: Option<String>,
    /// Post caption or Threads body text.
    pub text: Option<String>,
    pub duration_secs: Option<f64>,
    /// Whether the primary video or audio file has an audio stream.
    pub has_audio: bool,
}

impl AcquiredMedia {
    pub fn videos(&self) -> impl Iterator<Item = &MediaFile> {
        self.files.iter().filter(|f| f.kind == MediaKind::Video)
    }

    pub fn images(&self) -> impl Iterator<Item = &MediaFile> {
        self.files.iter().filter(|f| f.kind == MediaKind::Image)
    }

    pub fn primary_video(&self) -> Option<&Path> {
        self.videos().next().map(|f| f.path.as_path())
    }

    /// The file transcription should read: the first video, else an audio file.
    pub fn audio_source(&self) -> Option<&Path> {
        self.primary_video().or_else(|| {
            self.files
                .iter()
                .find(|f| f.kind == MediaKind::Audio)
                .map(|f| f.path.as_path())
        })
    }

    pub fn image_count(&self) -> usize {
        self.images().count()
    }
}

/// Subset of yt-dlp's `--dump-single-json` output we read.
#[derive(Debug, Default, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    command: String,
    cookies_file: Option<PathBuf>,
    probe: Ffprobe,
}

impl YtDlp {
    pub fn new(command: impl Into<String>, cookies_file: Option<PathBuf>, probe: Ffprobe) -> Self {
        Self {
            command: command.into(),
            cookies_file,
            probe,
        }
    }

    /// Download `url` into `dest` and describe what arrived.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<AcquiredMedia> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| ReelDigestError::io(dest, e))?;

        let mut args = vec![
            "--no-simulate".to_string(),
            "--dump-single-json".into(),
            "--no-progress".into(),
            "-o".into(),
            dest.join("media_%(autonumber)03d.%(ext)s")
                .to_string_lossy()
                .into_owned(),
        ];
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.push(url.to_string());

        let out = run_tool(&self.command, &args, None, None)
            .await
            .map_err(download_error)?;

        let info: YtDlpInfo = serde_json::from_str(out.stdout.trim()).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable yt-dlp metadata");
            YtDlpInfo::default()
        });

        let files = scan_media(dest).await?;
        if files.is_empty() {
            return Err(ReelDigestError::download(
                DownloadFailure::NotFound,
                format!("{url}: no media files downloaded"),
            ));
        }

        let mut media = AcquiredMedia {
            title: info.title.clone().filter(|t| !t.trim().is_empty()),
            text: info
                .description
                .clone()
                .or_else(|| info.entries.iter().find_map(|e| e.description.clone()))
                .filter(|t| !t.trim().is_empty()),
            duration_secs: info
                .duration
                .or_else(|| info.entries.iter().find_map(|e| e.duration)),
            files,
            has_audio: false,
        };

        if let Some(source) = media.audio_source().map(Path::to_path_buf) {
            media.has_audio = match self.probe.has_audio(&source).await {
                Ok(has) => has,
                Err(e) => {
                    // Assume a track is there and let transcription decide
                    warn!(error = %e, "audio probe failed");
                    true
                }
            };
            if media.duration_secs.is_none() {
                media.duration_secs = self.probe.duration(&source).await.ok();
            }
        }

        info!(
            files = media.files.len(),
            images = media.image_count(),
            duration = ?media.duration_secs,
            has_audio = media.has_audio,
            "media acquired"
        );
        Ok(media)
    }
}

/// Media files in `dir`, sorted by name so carousel order is preserved.
async fn scan_media(dir: &Path) -> Result<Vec<MediaFile>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ReelDigestError::io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ReelDigestError::io(dir, e))?
    {
        let path = entry.path();
        match MediaKind::from_path(&path) {
            Some(kind) => files.push(MediaFile { path, kind }),
            None => debug!(path = %path.display(), "ignoring non-media file"),
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn download_error(err: ToolError) -> ReelDigestError {
    let kind = match &err {
        ToolError::Failed { stderr, .. } => classify_download_error(stderr),
        _ => DownloadFailure::Transient,
    };
    ReelDigestError::download(kind, err.to_string())
}

/// Map yt-dlp's error text to a failure kind.
pub fn classify_download_error(stderr: &str) -> DownloadFailure {
    let lower = stderr.to_lowercase();
    let denied = [
        "private",
        "login required",
        "log in",
        "403",
        "cookies",
        "not authorized",
        "age-restricted",
    ];
    let missing = [
        "404",
        "not found",
        "not available",
        "does not exist",
        "unsupported url",
        "has been removed",
    ];
    if denied.iter().any(|m| lower.contains(m)) {
        DownloadFailure::AccessDenied
    } else if missing.iter().any(|m| lower.contains(m)) {
        DownloadFailure::NotFound
    } else {
        DownloadFailure::Transient
    }
}
