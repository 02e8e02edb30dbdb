//! The per-job stage runner.
//!
//! `Received → Acquiring → [Transcribing] → [AnalyzingFrames] → Summarizing →
//! Persisting → [Syncing] → Completed`, with `Failed(stage)` reachable from
//! every non-terminal state. Bracketed stages run only when the media calls
//! for them. Every collaborator call is bounded by its configured timeout,
//! and the job's scratch directory is gone before [`Orchestrator::run`]
//! returns.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use reeldigest_media::{AcquiredMedia, FrameExtract, MediaKind, plan_frame_offsets};
use reeldigest_shared::text::truncate_chars;
use reeldigest_shared::{
    AppConfig, ContentType, DownloadLogEntry, FramesConfig, ProcessedUrl, ReelDigestError, Result, Stage,
    StructuredSummary, SyncIssue, TimeoutsConfig, expand_home,
};
use reeldigest_storage::Storage;
use reeldigest_summarize::{InstructionTemplate, SummarizationBackend, SummaryRequest};

use crate::artifact::{ArtifactWriter, NoteInput};
use crate::clock::Clock;
use crate::collaborators::{FrameDescriber, FrameSampler, MediaAcquirer, SyncAgent, Transcriber};
use crate::frame_pool::FramePool;
use crate::job::{Job, JobState};
use crate::sync::{DailySyncManager, SyncInput, SyncStatus};

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Told about every state a job enters.
pub trait StageObserver: Send + Sync {
    fn state_changed(&self, job: &Job, state: JobState);
}

/// No-op observer for the service and tests.
pub struct SilentObserver;

impl StageObserver for SilentObserver {
    fn state_changed(&self, _job: &Job, _state: JobState) {}
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The external services a job talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub acquirer: Arc<dyn MediaAcquirer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub sampler: Arc<dyn FrameSampler>,
    pub describer: Arc<dyn FrameDescriber>,
    pub summarizer: Arc<dyn SummarizationBackend>,
    /// `None` when knowledge-base sync is disabled.
    pub sync_agent: Option<Arc<dyn SyncAgent>>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub temp_root: PathBuf,
    pub artifact_root: PathBuf,
    pub frames: FramesConfig,
    pub timeouts: TimeoutsConfig,
    pub sync_title_prefix: String,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            temp_root: expand_home(&config.storage.temp_dir),
            artifact_root: expand_home(&config.storage.artifact_dir),
            frames: config.frames.clone(),
            timeouts: config.timeouts.clone(),
            sync_title_prefix: config.sync.title_prefix.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Completion {
    pub record: ProcessedUrl,
    pub summary: StructuredSummary,
    pub sync: SyncStatus,
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed(Completion),
    Failed { stage: Stage, error: ReelDigestError },
}

/// The finished job together with what came of it.
#[derive(Debug)]
pub struct JobReport {
    pub job: Job,
    pub outcome: JobOutcome,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    acquirer: Arc<dyn MediaAcquirer>,
    transcriber: Arc<dyn Transcriber>,
    sampler: Arc<dyn FrameSampler>,
    summarizer: Arc<dyn SummarizationBackend>,
    pool: FramePool,
    sync: Option<DailySyncManager>,
    storage: Arc<Storage>,
    artifacts: ArtifactWriter,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    observer: Arc<dyn StageObserver>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        storage: Arc<Storage>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        let pool = FramePool::new(
            collaborators.describer,
            settings.frames.concurrency,
            Duration::from_secs(settings.timeouts.frame),
        );
        let sync = collaborators.sync_agent.map(|agent| {
            DailySyncManager::new(
                agent,
                storage.clone(),
                clock.clone(),
                settings.sync_title_prefix.clone(),
                Duration::from_secs(settings.timeouts.sync),
            )
        });

        Self {
            acquirer: collaborators.acquirer,
            transcriber: collaborators.transcriber,
            sampler: collaborators.sampler,
            summarizer: collaborators.summarizer,
            pool,
            sync,
            storage,
            artifacts: ArtifactWriter::new(settings.artifact_root.clone()),
            clock,
            settings,
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.summarizer.name()
    }

    /// Drive `job` to a terminal state. Never returns early with an error:
    /// every failure is reported as [`JobOutcome::Failed`] with its stage.
    #[instrument(skip_all, fields(job_id = %job.id, url = %job.url.key, attempt = job.attempt))]
    pub async fn run(&self, mut job: Job) -> JobReport {
        let started = Instant::now();
        let result = self.run_stages(&mut job).await;
        job.discard_scratch();

        let outcome = match result {
            Ok(completion) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job completed"
                );
                JobOutcome::Completed(completion)
            }
            Err(err) => {
                let stage = job.state().failure_stage();
                let error = if err.stage() == Some(stage) {
                    err
                } else {
                    ReelDigestError::for_stage(stage, err.to_string())
                };
                match job.advance(JobState::Failed(stage)) {
                    Ok(()) => self.observer.state_changed(&job, job.state()),
                    Err(e) => error!(error = %e, "could not mark job failed"),
                }
                warn!(
                    stage = %stage,
                    error = %error,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job failed"
                );
                JobOutcome::Failed { stage, error }
            }
        };

        JobReport { job, outcome }
    }

    async fn run_stages(&self, job: &mut Job) -> Result<Completion> {
        let timeouts = self.settings.timeouts.clone();
        let work = job.create_scratch(&self.settings.temp_root)?;

        // Acquiring
        self.enter(job, JobState::Acquiring)?;
        let media = bounded(
            Stage::Download,
            timeouts.acquire,
            self.acquirer.fetch(&job.url.fetch_url(), &work.join("media")),
        )
        .await?;
        info!(
            files = media.files.len(),
            has_audio = media.has_audio,
            duration_secs = media.duration_secs,
            "media acquired"
        );
        self.log_download(job, &media).await;

        // Transcribing
        let mut transcript = None;
        if let Some(source) = media.audio_source().filter(|_| media.has_audio) {
            self.enter(job, JobState::Transcribing)?;
            let text = bounded(
                Stage::Transcribe,
                timeouts.transcribe,
                self.transcriber.transcribe(source, &work),
            )
            .await?;
            if text.trim().is_empty() {
                info!("no speech detected, continuing with visuals only");
            } else {
                transcript = Some(text);
            }
        }

        let mut caption = media.text.clone().filter(|t| !t.trim().is_empty());
        if transcript.is_none() && job.content_type() == ContentType::Threads {
            transcript = caption.take();
        }

        // AnalyzingFrames
        let mut frames = Vec::new();
        let mut missing_frames = Vec::new();
        if let Some(extracts) = self.collect_frames(job, &media, &work).await? {
            let analysis = self.pool.analyze(extracts).await;
            missing_frames = analysis.missing.clone();
            frames = analysis.into_descriptions()?;
        }

        // Summarizing
        self.enter(job, JobState::Summarizing)?;
        let request = SummaryRequest {
            content_type: job.content_type(),
            title: media.title.clone(),
            transcript: transcript.clone(),
            caption: caption.clone(),
            frame_descriptions: frames.clone(),
            template: InstructionTemplate::select(job.content_type(), transcript.is_some()),
        };
        if !request.has_material() {
            return Err(ReelDigestError::Summarize(
                "nothing to summarize: no transcript and no frame descriptions".into(),
            ));
        }
        let summary = bounded(
            Stage::Summarize,
            timeouts.summarize,
            self.summarizer.summarize(&request),
        )
        .await?;

        // Persisting
        self.enter(job, JobState::Persisting)?;
        let processed_at = self.clock.now();
        let title = note_title(media.title.as_deref(), &summary, job.content_type());
        let note = NoteInput {
            url: &job.url.key,
            content_type: job.content_type(),
            title: &title,
            summary: &summary,
            frames: &frames,
            missing_frames: &missing_frames,
            caption: caption.as_deref(),
            transcript: transcript.as_deref(),
            processed_at,
        };
        let artifact_path = self
            .artifacts
            .write(&note)
            .map_err(|e| ReelDigestError::Persist(e.to_string()))?;
        let record = ProcessedUrl {
            url: job.url.key.clone(),
            content_type: job.content_type(),
            title,
            chat_id: job.chat_id,
            artifact_path,
            processed_at,
        };
        self.storage
            .complete(&record)
            .await
            .map_err(|e| ReelDigestError::Persist(e.to_string()))?;

        // Syncing
        let sync = match &self.sync {
            Some(manager) => {
                self.enter(job, JobState::Syncing)?;
                self.sync_note(manager, &record, &media).await
            }
            None => SyncStatus::Disabled,
        };

        self.enter(job, JobState::Completed)?;
        Ok(Completion {
            record,
            summary,
            sync,
        })
    }

    /// Frames to describe: sampled from the video, or the post's images in
    /// gallery order. `None` when the media has nothing visual.
    async fn collect_frames(
        &self,
        job: &mut Job,
        media: &AcquiredMedia,
        work: &Path,
    ) -> Result<Option<Vec<FrameExtract>>> {
        if let Some(video) = media.primary_video() {
            self.enter(job, JobState::AnalyzingFrames)?;
            let frames = &self.settings.frames;
            let offsets =
                plan_frame_offsets(media.duration_secs, frames.min_frames, frames.max_frames);
            let extracts = bounded(
                Stage::Analyze,
                self.settings.timeouts.frame,
                self.sampler.sample(video, &offsets, &work.join("frames")),
            )
            .await?;
            return Ok(Some(extracts));
        }

        if media.image_count() > 0 {
            self.enter(job, JobState::AnalyzingFrames)?;
            let extracts = media
                .images()
                .enumerate()
                .map(|(i, file)| FrameExtract {
                    offset_secs: i as f64,
                    path: file.path.clone(),
                })
                .collect();
            return Ok(Some(extracts));
        }

        Ok(None)
    }

    /// Record the byte sizes of what was fetched. A failed write only warns.
    async fn log_download(&self, job: &Job, media: &AcquiredMedia) {
        let mut entry = DownloadLogEntry {
            url: job.url.key.clone(),
            content_type: job.content_type(),
            title: media.title.clone().unwrap_or_default(),
            video_bytes: 0,
            audio_bytes: 0,
            image_bytes: Vec::new(),
            downloaded_at: self.clock.now(),
        };
        for file in &media.files {
            let size = match std::fs::metadata(&file.path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "cannot size downloaded file");
                    0
                }
            };
            match file.kind {
                MediaKind::Video => entry.video_bytes += size,
                MediaKind::Audio => entry.audio_bytes += size,
                MediaKind::Image => entry.image_bytes.push(size),
            }
        }
        info!(total_bytes = entry.total_bytes(), "download logged");
        if let Err(e) = self.storage.record_download(&entry).await {
            warn!(error = %e, "failed to record download");
        }
    }

    /// Sync never fails the job; problems are logged for follow-up.
    async fn sync_note(
        &self,
        manager: &DailySyncManager,
        record: &ProcessedUrl,
        media: &AcquiredMedia,
    ) -> SyncStatus {
        let input = SyncInput {
            url: &record.url,
            title: &record.title,
            note_path: &record.artifact_path,
            media_files: media.files.iter().map(|f| f.path.clone()).collect(),
            processed_at: record.processed_at,
        };
        match manager.sync(input).await {
            Ok(receipt) => SyncStatus::Synced(receipt),
            Err(err) => {
                let reason = match &err {
                    ReelDigestError::Sync(msg) => msg.clone(),
                    other => other.to_string(),
                };
                warn!(error = %reason, "sync failed, job still completes");
                let issue = SyncIssue {
                    url: record.url.clone(),
                    chat_id: record.chat_id,
                    error: reason.clone(),
                    created_at: self.clock.now(),
                };
                if let Err(e) = self.storage.record_sync_issue(&issue).await {
                    error!(error = %e, "failed to record sync issue");
                }
                SyncStatus::Failed(reason)
            }
        }
    }

    fn enter(&self, job: &mut Job, state: JobState) -> Result<()> {
        job.advance(state)?;
        self.observer.state_changed(job, state);
        Ok(())
    }
}

async fn bounded<T>(
    stage: Stage,
    secs: u64,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .unwrap_or_else(|_| Err(ReelDigestError::timed_out(stage, secs)))
}

/// The media title unless it is one of the generic "Video by …" names the
/// acquisition tool invents, else the opening of the summary.
fn note_title(media_title: Option<&str>, summary: &StructuredSummary, ct: ContentType) -> String {
    const GENERIC: &[&str] = &["Video by ", "Post by ", "Thread by "];
    let specific = media_title
        .map(str::trim)
        .filter(|t| !t.is_empty() && !GENERIC.iter().any(|g| t.starts_with(g)));
    if let Some(title) = specific {
        return truncate_chars(title, 80);
    }

    let first_sentence = summary
        .summary
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty());
    match first_sentence {
        Some(s) => truncate_chars(s, 60),
        None => ct.label().to_string(),
    }
}
