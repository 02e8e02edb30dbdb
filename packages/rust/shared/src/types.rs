//! Core domain types shared by the pipeline, the stores and the service.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReelDigestError;

/// Originating chat identifier (Telegram chat ids are signed 64-bit).
pub type ChatId = i64;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Classifications
// ---------------------------------------------------------------------------

/// Supported kinds of submitted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Instagram reel: a short video, usually with speech.
    Reel,
    /// Instagram post: one image or a carousel.
    Post,
    /// Threads post: text, optionally with media.
    Threads,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reel => "reel",
            Self::Post => "post",
            Self::Threads => "threads",
        }
    }

    /// Human-facing label used in notes and messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reel => "Instagram Reel",
            Self::Post => "Instagram Post",
            Self::Threads => "Threads Post",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ReelDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reel" => Ok(Self::Reel),
            "post" => Ok(Self::Post),
            "threads" => Ok(Self::Threads),
            other => Err(ReelDigestError::validation(format!(
                "unknown content type: {other}"
            ))),
        }
    }
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcribe,
    Analyze,
    Summarize,
    Persist,
    Sync,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcribe => "transcribe",
            Self::Analyze => "analyze",
            Self::Summarize => "summarize",
            Self::Persist => "persist",
            Self::Sync => "sync",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ReelDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            "transcribe" => Ok(Self::Transcribe),
            "analyze" => Ok(Self::Analyze),
            "summarize" => Ok(Self::Summarize),
            "persist" => Ok(Self::Persist),
            "sync" => Ok(Self::Sync),
            other => Err(ReelDigestError::validation(format!("unknown stage: {other}"))),
        }
    }
}

/// Lifecycle of a failure record. Only `Pending` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Pending,
    Succeeded,
    Abandoned,
}

impl FailureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Abandoned => "abandoned",
        }
    }
}

impl FromStr for FailureStatus {
    type Err = ReelDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(ReelDigestError::validation(format!(
                "unknown failure status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A URL that completed processing. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedUrl {
    /// Normalized URL (unique key).
    pub url: String,
    pub content_type: ContentType,
    pub title: String,
    pub chat_id: ChatId,
    /// Where the Markdown note was written.
    pub artifact_path: PathBuf,
    pub processed_at: DateTime<Utc>,
}

/// An in-flight claim on a URL held by a live job or a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub url: String,
    pub job_id: JobId,
    pub chat_id: ChatId,
    pub reserved_at: DateTime<Utc>,
}

/// What the deduplication store knows about a URL.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupEntry {
    Completed(ProcessedUrl),
    InFlight(Reservation),
}

/// Input for a new failure record.
#[derive(Debug, Clone)]
pub struct NewFailure {
    pub url: String,
    pub content_type: ContentType,
    pub chat_id: ChatId,
    pub stage: Stage,
    pub error_detail: String,
    pub created_at: DateTime<Utc>,
}

/// A job that failed a stage and waits for the retry sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: i64,
    pub url: String,
    pub content_type: ContentType,
    pub chat_id: ChatId,
    pub stage: Stage,
    pub error_detail: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    pub status: FailureStatus,
}

/// The external resource that collects one day's synced artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySyncRecord {
    pub date: NaiveDate,
    pub external_id: String,
    pub external_title: String,
    pub item_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A sync failure kept for manual follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncIssue {
    pub url: String,
    pub chat_id: ChatId,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts exposed by the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub completed: u64,
    pub pending: u64,
    pub succeeded: u64,
    pub abandoned: u64,
    pub sync_issues: u64,
    /// Rows in the download log.
    pub downloads: u64,
    pub downloaded_bytes: u64,
}

/// Byte sizes of one acquisition, logged after the download stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadLogEntry {
    pub url: String,
    pub content_type: ContentType,
    pub title: String,
    pub video_bytes: u64,
    pub audio_bytes: u64,
    /// One entry per image, in gallery order.
    pub image_bytes: Vec<u64>,
    pub downloaded_at: DateTime<Utc>,
}

impl DownloadLogEntry {
    pub fn total_bytes(&self) -> u64 {
        self.video_bytes + self.audio_bytes + self.image_bytes.iter().sum::<u64>()
    }
}

// ---------------------------------------------------------------------------
// Pipeline artifacts
// ---------------------------------------------------------------------------

/// One described frame, keyed by its offset into the media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub offset_secs: f64,
    pub text: String,
}

/// The four sections every summarization backend produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub summary: String,
    pub bullet_points: Vec<String>,
    #[serde(default)]
    pub tools_and_skills: Vec<String>,
    #[serde(default)]
    pub visual_observations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse job id");
        assert_eq!(id, parsed);
    }

    #[test]
    fn enums_parse_their_own_names() {
        for ct in [ContentType::Reel, ContentType::Post, ContentType::Threads] {
            assert_eq!(ct.as_str().parse::<ContentType>().expect("parse"), ct);
        }
        for status in [
            FailureStatus::Pending,
            FailureStatus::Succeeded,
            FailureStatus::Abandoned,
        ] {
            assert_eq!(status.as_str().parse::<FailureStatus>().expect("parse"), status);
        }
        assert!("video".parse::<ContentType>().is_err());
        assert!("crawl".parse::<Stage>().is_err());
    }

    #[test]
    fn summary_defaults_optional_sections() {
        let json = r#"{"summary":"s","bullet_points":["a"]}"#;
        let parsed: StructuredSummary = serde_json::from_str(json).expect("deserialize");
        assert!(parsed.tools_and_skills.is_empty());
        assert!(parsed.visual_observations.is_empty());
    }

    #[test]
    fn failed_job_serializes_status_snake_case() {
        let job = FailedJob {
            id: 7,
            url: "instagram.com/reel/abc".into(),
            content_type: ContentType::Reel,
            chat_id: 42,
            stage: Stage::Download,
            error_detail: "timed out".into(),
            retry_count: 1,
            created_at: Utc::now(),
            last_retry_at: None,
            status: FailureStatus::Pending,
        };
        let json = serde_json::to_string(&job).expect("serialize");
        assert!(json.contains(r#""status":"pending""#));
        assert!(json.contains(r#""stage":"download""#));
        assert!(!json.contains("last_retry_at"));
    }
}
