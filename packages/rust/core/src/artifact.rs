//! Markdown note writer.
//!
//! Notes land under `<root>/<YYYY-MM-DD>/<slug>-<hash8>.md`. The hash is
//! taken from the normalized URL so the same link always maps to the same
//! file name on a given day.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use reeldigest_shared::{
    ContentType, FrameDescription, ReelDigestError, Result, StructuredSummary,
};

use crate::frame_pool::MissingFrame;

const MAX_SLUG_LEN: usize = 50;

/// Everything rendered into one note.
#[derive(Debug, Clone)]
pub struct NoteInput<'a> {
    pub url: &'a str,
    pub content_type: ContentType,
    pub title: &'a str,
    pub summary: &'a StructuredSummary,
    pub frames: &'a [FrameDescription],
    pub missing_frames: &'a [MissingFrame],
    pub caption: Option<&'a str>,
    pub transcript: Option<&'a str>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the note for `input` goes.
    pub fn note_path(&self, input: &NoteInput<'_>) -> PathBuf {
        let day = input.processed_at.format("%Y-%m-%d").to_string();
        let slug = slugify(input.title, input.content_type);
        self.root
            .join(day)
            .join(format!("{slug}-{}.md", url_hash8(input.url)))
    }

    /// Render and write the note. Written to a temp file, then renamed.
    #[instrument(skip_all, fields(url = %input.url))]
    pub fn write(&self, input: &NoteInput<'_>) -> Result<PathBuf> {
        let target = self.note_path(input);
        let dir = target
            .parent()
            .ok_or_else(|| ReelDigestError::Persist(format!("no parent for {}", target.display())))?;
        std::fs::create_dir_all(dir).map_err(|e| ReelDigestError::io(dir, e))?;

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("note.md");
        let temp = dir.join(format!(".{file_name}.tmp"));

        std::fs::write(&temp, render_note(input)).map_err(|e| ReelDigestError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| ReelDigestError::io(&target, e))?;

        debug!(path = %target.display(), "note written");
        Ok(target)
    }
}

/// First 8 hex digits of the SHA-256 of the normalized URL.
pub fn url_hash8(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

/// Lower-case, dash-separated, at most 50 characters. Falls back to the
/// content type when nothing usable is left.
pub fn slugify(title: &str, fallback: ContentType) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
        if slug.chars().count() >= MAX_SLUG_LEN {
            break;
        }
    }
    if slug.is_empty() {
        fallback.as_str().to_string()
    } else {
        slug
    }
}

pub fn render_note(input: &NoteInput<'_>) -> String {
    let mut out = String::new();
    let title_json =
        serde_json::to_string(input.title).unwrap_or_else(|_| format!("\"{}\"", input.content_type));

    let _ = writeln!(out, "---");
    let _ = writeln!(out, "title: {title_json}");
    let _ = writeln!(out, "source: https://{}", input.url);
    let _ = writeln!(out, "content_type: {}", input.content_type);
    let _ = writeln!(
        out,
        "processed_at: {}",
        input.processed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "---\n");
    let _ = writeln!(out, "# {}\n", input.title);
    let _ = writeln!(out, "> {} · https://{}\n", input.content_type.label(), input.url);

    let _ = writeln!(out, "## Summary\n\n{}\n", input.summary.summary.trim());

    write_list(&mut out, "Key Points", &input.summary.bullet_points);
    write_list(&mut out, "Tools & Skills", &input.summary.tools_and_skills);
    write_list(&mut out, "Visual Observations", &input.summary.visual_observations);

    if !input.frames.is_empty() || !input.missing_frames.is_empty() {
        let _ = writeln!(out, "## Frame Timeline\n");
        let is_gallery = input.content_type == ContentType::Post;
        for frame in input.frames {
            let _ = writeln!(
                out,
                "- **{}** {}",
                frame_label(frame.offset_secs, is_gallery),
                frame.text.trim().replace('\n', " ")
            );
        }
        for missing in input.missing_frames {
            let _ = writeln!(
                out,
                "- **{}** _(no description: {})_",
                frame_label(missing.offset_secs, is_gallery),
                missing.reason
            );
        }
        out.push('\n');
    }

    if let Some(caption) = input.caption.filter(|c| !c.trim().is_empty()) {
        let _ = writeln!(out, "## Caption\n\n{}\n", caption.trim());
    }

    if let Some(transcript) = input.transcript.filter(|t| !t.trim().is_empty()) {
        let _ = writeln!(out, "## Transcript\n\n{}\n", transcript.trim());
    }

    out
}

fn write_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {heading}\n");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out.push('\n');
}

fn frame_label(offset_secs: f64, is_gallery: bool) -> String {
    if is_gallery {
        format!("Image {}", offset_secs as u64 + 1)
    } else {
        format!("[{offset_secs:.1}s]")
    }
}
