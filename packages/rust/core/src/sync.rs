//! Knowledge-base sync.
//!
//! [`CommandSyncAgent`] talks to an external executable over a JSON-lines
//! protocol on stdin/stdout:
//!
//! ```text
//! → {"type":"sync","day_key":"2026-03-14","title":...,"note_path":...,"media_files":[...],"existing_resource":{...}|null,...}
//! ← {"type":"log","message":"..."}            (any number, ignored)
//! ← {"type":"synced","external_id":...,"external_title":...,"external_url":...}
//! ← {"type":"error","message":...,"missing_resource":true|false}
//! ```
//!
//! [`DailySyncManager`] groups every note of a day into one external
//! resource and recovers once when that resource has been deleted upstream.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use reeldigest_shared::{ReelDigestError, Result};
use reeldigest_storage::Storage;

use crate::clock::Clock;
use crate::collaborators::{ExternalResource, SyncAgent, SyncFailure, SyncReceipt, SyncRequest};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentRequest<'a> {
    Sync(&'a SyncRequest),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentResponse {
    Synced {
        external_id: String,
        external_title: String,
        #[serde(default)]
        external_url: Option<String>,
    },
    Error {
        message: String,
        #[serde(default)]
        missing_resource: bool,
    },
    Log {
        message: String,
    },
}

/// Runs the configured sync executable once per artifact.
#[derive(Debug, Clone)]
pub struct CommandSyncAgent {
    command: String,
    args: Vec<String>,
}

impl CommandSyncAgent {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl SyncAgent for CommandSyncAgent {
    async fn sync_artifact(
        &self,
        request: &SyncRequest,
    ) -> std::result::Result<SyncReceipt, SyncFailure> {
        let failed = |msg: String| SyncFailure::Failed(msg);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                failed(format!(
                    "failed to spawn sync agent: {e}. Is `{}` installed?",
                    self.command
                ))
            })?;

        let json = serde_json::to_string(&AgentRequest::Sync(request))
            .map_err(|e| failed(format!("failed to serialize sync request: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| failed("failed to capture sync agent stdin".into()))?;
        stdin
            .write_all(format!("{json}\n").as_bytes())
            .await
            .map_err(|e| failed(format!("failed to write to sync agent stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| failed(format!("failed to flush sync agent stdin: {e}")))?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| failed("failed to capture sync agent stdout".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let response = loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| failed(format!("sync agent read error: {e}")))?;
            let Some(line) = line else {
                let status = child
                    .wait()
                    .await
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| e.to_string());
                return Err(failed(format!(
                    "sync agent exited ({status}) without a response"
                )));
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentResponse>(trimmed) {
                Ok(AgentResponse::Log { message }) => debug!(message = %message, "sync agent"),
                Ok(terminal) => break terminal,
                Err(_) => debug!(line = trimmed, "ignoring non-protocol sync agent output"),
            }
        };

        // Give the agent a moment to exit cleanly; kill_on_drop covers the rest.
        let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;

        match response {
            AgentResponse::Synced {
                external_id,
                external_title,
                external_url,
            } => Ok(SyncReceipt {
                external_id,
                external_title,
                external_url,
            }),
            AgentResponse::Error {
                message,
                missing_resource: true,
            } => Err(SyncFailure::ResourceMissing(message)),
            AgentResponse::Error { message, .. } => Err(SyncFailure::Failed(message)),
            AgentResponse::Log { message } => Err(SyncFailure::Failed(message)),
        }
    }
}

// ---------------------------------------------------------------------------
// Daily grouping
// ---------------------------------------------------------------------------

/// Result of the sync stage as reported to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Synced(SyncReceipt),
    Failed(String),
    Disabled,
}

/// One finished note to sync.
#[derive(Debug, Clone)]
pub struct SyncInput<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub note_path: &'a Path,
    pub media_files: Vec<PathBuf>,
    pub processed_at: DateTime<Utc>,
}

pub struct DailySyncManager {
    agent: Arc<dyn SyncAgent>,
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    title_prefix: String,
    timeout: Duration,
}

impl DailySyncManager {
    pub fn new(
        agent: Arc<dyn SyncAgent>,
        storage: Arc<Storage>,
        clock: Arc<dyn Clock>,
        title_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent,
            storage,
            clock,
            title_prefix: title_prefix.into(),
            timeout,
        }
    }

    pub fn resource_title(&self, day: NaiveDate) -> String {
        format!("{} - {}", self.title_prefix, day.format("%Y-%m-%d"))
    }

    /// Push one note into the day's resource, creating the resource when
    /// needed. Errors are sync errors and never fail the job.
    #[instrument(skip_all, fields(url = %input.url))]
    pub async fn sync(&self, input: SyncInput<'_>) -> Result<SyncReceipt> {
        let day = input.processed_at.date_naive();
        let existing = self
            .storage
            .get_daily_sync(day)
            .await
            .map_err(|e| ReelDigestError::Sync(e.to_string()))?;

        let mut request = SyncRequest {
            day_key: day,
            title: input.title.to_string(),
            source_url: format!("https://{}", input.url),
            note_path: input.note_path.to_path_buf(),
            media_files: input.media_files,
            existing_resource: existing.map(|r| ExternalResource {
                id: r.external_id,
                title: r.external_title,
            }),
            new_resource_title: self.resource_title(day),
        };

        let receipt = match self.attempt(&request).await {
            Ok(receipt) => receipt,
            Err(SyncFailure::ResourceMissing(msg)) if request.existing_resource.is_some() => {
                warn!(day = %day, reason = %msg, "daily resource missing, recreating");
                self.storage
                    .invalidate_daily_sync(day)
                    .await
                    .map_err(|e| ReelDigestError::Sync(e.to_string()))?;
                request.existing_resource = None;
                self.attempt(&request)
                    .await
                    .map_err(|e| ReelDigestError::Sync(e.to_string()))?
            }
            Err(e) => return Err(ReelDigestError::Sync(e.to_string())),
        };

        let record = self
            .storage
            .record_daily_sync(
                day,
                &receipt.external_id,
                &receipt.external_title,
                self.clock.now(),
            )
            .await
            .map_err(|e| ReelDigestError::Sync(e.to_string()))?;

        info!(
            day = %day,
            external_id = %record.external_id,
            item_count = record.item_count,
            "note synced"
        );
        Ok(receipt)
    }

    async fn attempt(&self, request: &SyncRequest) -> std::result::Result<SyncReceipt, SyncFailure> {
        match tokio::time::timeout(self.timeout, self.agent.sync_artifact(request)).await {
            Ok(result) => result,
            Err(_) => Err(SyncFailure::Failed(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
