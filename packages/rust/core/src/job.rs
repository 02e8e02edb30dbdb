//! Job state machine.
//!
//! A job is one processing attempt of one normalized URL. It moves forward
//! through the stages in order, may skip stages that do not apply to its
//! media, and ends in exactly one terminal state.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use reeldigest_shared::{ChatId, ContentType, FailedJob, JobId, ReelDigestError, Result, Stage};

use crate::intake::NormalizedUrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Acquiring,
    Transcribing,
    AnalyzingFrames,
    Summarizing,
    Persisting,
    Syncing,
    Completed,
    Failed(Stage),
    Abandoned,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Abandoned)
    }

    /// Stage charged with a failure that happens while in this state.
    pub fn failure_stage(&self) -> Stage {
        match self {
            Self::Received | Self::Acquiring => Stage::Download,
            Self::Transcribing => Stage::Transcribe,
            Self::AnalyzingFrames => Stage::Analyze,
            Self::Summarizing => Stage::Summarize,
            Self::Persisting | Self::Completed | Self::Abandoned => Stage::Persist,
            Self::Syncing => Stage::Sync,
            Self::Failed(stage) => *stage,
        }
    }

    /// Whether `next` is a legal successor.
    ///
    /// Stages may be skipped but never revisited. `Failed` is reachable from
    /// any non-terminal state; `Abandoned` only from `Failed`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Failed(_), Abandoned) => true,
            (from, Failed(_)) => !from.is_terminal(),
            (from, to) if from.is_terminal() || to == &Received || to == &Abandoned => false,
            (from, to) => from.rank() < to.rank(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Acquiring => 1,
            Self::Transcribing => 2,
            Self::AnalyzingFrames => 3,
            Self::Summarizing => 4,
            Self::Persisting => 5,
            Self::Syncing => 6,
            Self::Completed => 7,
            Self::Failed(_) | Self::Abandoned => 8,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Received => "received".into(),
            Self::Acquiring => "acquiring".into(),
            Self::Transcribing => "transcribing".into(),
            Self::AnalyzingFrames => "analyzing frames".into(),
            Self::Summarizing => "summarizing".into(),
            Self::Persisting => "persisting".into(),
            Self::Syncing => "syncing".into(),
            Self::Completed => "completed".into(),
            Self::Failed(stage) => format!("failed ({stage})"),
            Self::Abandoned => "abandoned".into(),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// One attempt at processing one URL.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub url: NormalizedUrl,
    pub chat_id: ChatId,
    /// 0 for a live submission, otherwise the retry attempt number.
    pub attempt: u32,
    state: JobState,
    history: Vec<JobState>,
    scratch: Option<TempDir>,
}

impl Job {
    pub fn new(url: NormalizedUrl, chat_id: ChatId) -> Self {
        Self {
            id: JobId::new(),
            url,
            chat_id,
            attempt: 0,
            state: JobState::Received,
            history: vec![JobState::Received],
            scratch: None,
        }
    }

    /// A fresh job for the next retry of a failure record.
    pub fn for_retry(record: &FailedJob) -> Self {
        let url = NormalizedUrl {
            key: record.url.clone(),
            content_type: record.content_type,
        };
        let mut job = Self::new(url, record.chat_id);
        job.attempt = record.retry_count + 1;
        job
    }

    pub fn content_type(&self) -> ContentType {
        self.url.content_type
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has been in, oldest first.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(ReelDigestError::validation(format!(
                "illegal job transition {} -> {}",
                self.state, next
            )));
        }
        debug!(job_id = %self.id, from = %self.state, to = %next, "job transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Create the job's scratch directory under `root`.
    pub fn create_scratch(&mut self, root: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(root).map_err(|e| ReelDigestError::io(root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", self.id))
            .tempdir_in(root)
            .map_err(|e| ReelDigestError::io(root, e))?;
        let path = dir.path().to_path_buf();
        self.scratch = Some(dir);
        Ok(path)
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Delete the scratch directory now instead of at drop.
    pub fn discard_scratch(&mut self) {
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(job_id = %self.id, path = %path.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reeldigest_shared::FailureStatus;

    use super::*;

    fn job() -> Job {
        Job::new(
            NormalizedUrl {
                key: "instagram.com/reel/abc".into(),
                content_type: ContentType::Reel,
            },
            1,
        )
    }

    #[test]
    fn forward_path_with_skips_is_legal() {
        let mut job = job();
        for next in [
            JobState::Acquiring,
            JobState::AnalyzingFrames,
            JobState::Summarizing,
            JobState::Persisting,
            JobState::Completed,
        ] {
            job.advance(next).expect("legal");
        }
        assert_eq!(job.history().len(), 6);
        assert!(job.state().is_terminal());
    }

    #[test]
    fn stages_are_never_revisited() {
        let mut job = job();
        job.advance(JobState::Acquiring).expect("legal");
        job.advance(JobState::Summarizing).expect("legal");
        assert!(job.advance(JobState::Transcribing).is_err());
        assert!(job.advance(JobState::Summarizing).is_err());
        assert!(job.advance(JobState::Received).is_err());
        assert_eq!(job.state(), JobState::Summarizing);
    }

    #[test]
    fn failed_is_absorbing_except_for_abandonment() {
        let mut job = job();
        job.advance(JobState::Acquiring).expect("legal");
        job.advance(JobState::Failed(Stage::Download)).expect("legal");
        assert!(job.advance(JobState::Summarizing).is_err());
        assert!(job.advance(JobState::Completed).is_err());
        assert!(job.advance(JobState::Failed(Stage::Summarize)).is_err());
        job.advance(JobState::Abandoned).expect("abandon");
        assert!(job.advance(JobState::Failed(Stage::Download)).is_err());
    }

    #[test]
    fn completed_cannot_fail_or_be_abandoned() {
        let mut job = job();
        job.advance(JobState::Completed).expect("legal");
        assert!(job.advance(JobState::Failed(Stage::Sync)).is_err());
        assert!(job.advance(JobState::Abandoned).is_err());
    }

    #[test]
    fn failure_stage_follows_current_state() {
        assert_eq!(JobState::Received.failure_stage(), Stage::Download);
        assert_eq!(JobState::AnalyzingFrames.failure_stage(), Stage::Analyze);
        assert_eq!(JobState::Persisting.failure_stage(), Stage::Persist);
    }

    #[test]
    fn retry_job_carries_attempt_number() {
        let record = FailedJob {
            id: 4,
            url: "instagram.com/p/xyz".into(),
            content_type: ContentType::Post,
            chat_id: 9,
            stage: Stage::Summarize,
            error_detail: "boom".into(),
            retry_count: 2,
            created_at: Utc::now(),
            last_retry_at: None,
            status: FailureStatus::Pending,
        };
        let job = Job::for_retry(&record);
        assert_eq!(job.attempt, 3);
        assert_eq!(job.state(), JobState::Received);
        assert_eq!(job.url.key, record.url);
        assert_eq!(job.content_type(), ContentType::Post);
    }

    #[test]
    fn scratch_is_removed_on_drop_and_discard() {
        let root = tempfile::tempdir().expect("root");

        let mut first = job();
        let path = first.create_scratch(root.path()).expect("scratch");
        std::fs::write(path.join("media.mp4"), b"x").expect("write");
        drop(first);
        assert!(!path.exists());

        let mut second = job();
        let path = second.create_scratch(root.path()).expect("scratch");
        second.discard_scratch();
        assert!(!path.exists());
        assert!(second.scratch_path().is_none());
    }
}
