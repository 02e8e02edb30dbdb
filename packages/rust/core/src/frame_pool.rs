//! Bounded-concurrency frame description.
//!
//! Frames are described independently and in parallel, at most
//! `concurrency` vision calls at a time. Results come back in offset order
//! regardless of completion order. A frame whose call fails or times out is
//! recorded as missing; the stage only fails when no frame succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use reeldigest_media::FrameExtract;
use reeldigest_shared::{FrameDescription, ReelDigestError, Result};

use crate::collaborators::FrameDescriber;

/// A frame that produced no description.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingFrame {
    pub offset_secs: f64,
    pub reason: String,
}

/// Outcome of describing a batch of frames.
#[derive(Debug, Clone, Default)]
pub struct FrameAnalysis {
    /// Ascending by offset.
    pub descriptions: Vec<FrameDescription>,
    pub missing: Vec<MissingFrame>,
}

impl FrameAnalysis {
    /// The descriptions, or an analyze error when every frame failed.
    pub fn into_descriptions(self) -> Result<Vec<FrameDescription>> {
        if self.descriptions.is_empty() {
            let detail = self
                .missing
                .last()
                .map(|m| m.reason.as_str())
                .unwrap_or("no frames to describe");
            return Err(ReelDigestError::Analyze(format!(
                "all {} frame descriptions failed: {detail}",
                self.missing.len()
            )));
        }
        Ok(self.descriptions)
    }
}

#[derive(Clone)]
pub struct FramePool {
    describer: Arc<dyn FrameDescriber>,
    concurrency: usize,
    per_frame_timeout: Duration,
}

impl FramePool {
    pub fn new(
        describer: Arc<dyn FrameDescriber>,
        concurrency: usize,
        per_frame_timeout: Duration,
    ) -> Self {
        Self {
            describer,
            concurrency: concurrency.max(1),
            per_frame_timeout,
        }
    }

    /// Describe every frame. Never fails as a whole; see
    /// [`FrameAnalysis::into_descriptions`].
    #[instrument(skip_all, fields(frames = frames.len(), concurrency = self.concurrency))]
    pub async fn analyze(&self, frames: Vec<FrameExtract>) -> FrameAnalysis {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(frames.len());

        for frame in frames {
            let sem = semaphore.clone();
            let describer = self.describer.clone();
            let timeout = self.per_frame_timeout;
            let offset = frame.offset_secs;

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Err("frame pool closed".to_string());
                };
                match tokio::time::timeout(timeout, describer.describe(&frame.path)).await {
                    Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
                    Ok(Ok(_)) => Err("empty description".to_string()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
                }
            });
            handles.push((offset, handle));
        }

        let mut analysis = FrameAnalysis::default();
        for (offset_secs, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(format!("describe task failed: {e}")));
            match outcome {
                Ok(text) => {
                    debug!(offset_secs, "frame described");
                    analysis.descriptions.push(FrameDescription { offset_secs, text });
                }
                Err(reason) => {
                    warn!(offset_secs, reason = %reason, "frame description missing");
                    analysis.missing.push(MissingFrame {
                        offset_secs,
                        reason,
                    });
                }
            }
        }

        analysis
            .descriptions
            .sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));
        analysis
            .missing
            .sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));

        info!(
            described = analysis.descriptions.len(),
            missing = analysis.missing.len(),
            "frame analysis finished"
        );
        analysis
    }
}
