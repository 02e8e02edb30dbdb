//! Interfaces to the external services a job depends on.
//!
//! The orchestrator only sees these traits; production implementations live
//! in [`crate::adapters`] and tests substitute fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use reeldigest_media::{AcquiredMedia, FrameExtract};
use reeldigest_shared::{ChatId, Result};

/// Downloads a post's media into a directory the job owns.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<AcquiredMedia>;
}

/// Speech-to-text. An empty string is a valid "no speech" result.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> Result<String>;
}

/// Pulls still frames out of a video at the given offsets.
#[async_trait]
pub trait FrameSampler: Send + Sync {
    async fn sample(
        &self,
        video: &Path,
        offsets: &[f64],
        out_dir: &Path,
    ) -> Result<Vec<FrameExtract>>;
}

/// Describes one image. Calls are independent of each other.
#[async_trait]
pub trait FrameDescriber: Send + Sync {
    async fn describe(&self, image: &Path) -> Result<String>;
}

/// Delivers a formatted message to the originating chat.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, chat_id: ChatId, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Knowledge-base sync
// ---------------------------------------------------------------------------

/// The external resource (one per day) that collects synced notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResource {
    pub id: String,
    pub title: String,
}

/// One artifact to push into the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRequest {
    pub day_key: NaiveDate,
    /// Title of the note being synced.
    pub title: String,
    pub source_url: String,
    pub note_path: PathBuf,
    pub media_files: Vec<PathBuf>,
    /// Resource to append to; `None` asks the agent to create one.
    pub existing_resource: Option<ExternalResource>,
    /// Title for a newly created resource.
    pub new_resource_title: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncReceipt {
    pub external_id: String,
    pub external_title: String,
    #[serde(default)]
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncFailure {
    /// The resource named in the request no longer exists.
    ResourceMissing(String),
    Failed(String),
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceMissing(msg) => write!(f, "resource missing: {msg}"),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

/// Pushes finished artifacts into a third-party knowledge base.
#[async_trait]
pub trait SyncAgent: Send + Sync {
    async fn sync_artifact(
        &self,
        request: &SyncRequest,
    ) -> std::result::Result<SyncReceipt, SyncFailure>;
}
