//! Fakes and fixtures shared by this crate's tests.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use reeldigest_media::{AcquiredMedia, FrameExtract, MediaFile, MediaKind};
use reeldigest_shared::{
    ChatId, ContentType, DownloadFailure, FramesConfig, ReelDigestError, Result,
    StructuredSummary, TimeoutsConfig,
};
use reeldigest_storage::Storage;
use reeldigest_summarize::{SummarizationBackend, SummaryRequest};

use crate::clock::Clock;
use crate::collaborators::{
    FrameDescriber, FrameSampler, MediaAcquirer, NotificationSink, SyncAgent, SyncFailure,
    SyncReceipt, SyncRequest, Transcriber,
};
use crate::intake::NormalizedUrl;
use crate::job::Job;
use crate::notify::Notifier;
use crate::orchestrator::{Collaborators, Orchestrator, PipelineSettings};
use crate::retry::RetryScheduler;
use crate::service::DigestService;

/// Create a temp file storage for testing.
pub async fn test_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("rd_test_{}.db", Uuid::now_v7()));
    Storage::open(&tmp).await.expect("open test db")
}

/// Take one from a countdown; `true` while it was above zero.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

// ---------------------------------------------------------------------------
// Media fakes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Serve {
    Video { duration: f64, has_audio: bool },
    Images(usize),
    Text(String),
}

pub struct FakeAcquirer {
    serve: Mutex<Serve>,
    fail_remaining: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Default for FakeAcquirer {
    fn default() -> Self {
        Self {
            serve: Mutex::new(Serve::Video {
                duration: 30.0,
                has_audio: true,
            }),
            fail_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeAcquirer {
    pub fn serve_images(&self, count: usize) {
        *self.serve.lock().expect("lock") = Serve::Images(count);
    }

    pub fn serve_text(&self, text: &str) {
        *self.serve.lock().expect("lock") = Serve::Text(text.into());
    }

    pub fn fail_next(&self, times: usize) {
        self.fail_remaining.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaAcquirer for FakeAcquirer {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<AcquiredMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_remaining) {
            return Err(ReelDigestError::download(
                DownloadFailure::Transient,
                "HTTP Error 503: Service Unavailable",
            ));
        }
        std::fs::create_dir_all(dest).map_err(|e| ReelDigestError::io(dest, e))?;

        let serve = self.serve.lock().expect("lock").clone();
        let caption = Some("Weekend baking #sourdough".to_string());
        let media = match serve {
            Serve::Video {
                duration,
                has_audio,
            } => {
                let path = dest.join("media_001.mp4");
                std::fs::write(&path, b"video").map_err(|e| ReelDigestError::io(&path, e))?;
                AcquiredMedia {
                    files: vec![MediaFile {
                        path,
                        kind: MediaKind::Video,
                    }],
                    title: Some("Video by baker".into()),
                    text: caption,
                    duration_secs: Some(duration),
                    has_audio,
                }
            }
            Serve::Images(count) => {
                let mut files = Vec::new();
                for i in 1..=count {
                    let path = dest.join(format!("media_{i:03}.jpg"));
                    std::fs::write(&path, b"image").map_err(|e| ReelDigestError::io(&path, e))?;
                    files.push(MediaFile {
                        path,
                        kind: MediaKind::Image,
                    });
                }
                AcquiredMedia {
                    files,
                    title: Some("Post by baker".into()),
                    text: caption,
                    ..Default::default()
                }
            }
            Serve::Text(text) => AcquiredMedia {
                text: Some(text),
                ..Default::default()
            },
        };
        Ok(media)
    }
}

pub struct FakeTranscriber {
    text: Mutex<String>,
    pub calls: AtomicUsize,
}

impl Default for FakeTranscriber {
    fn default() -> Self {
        Self {
            text: Mutex::new("today we shape a loaf of sourdough".into()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeTranscriber {
    pub fn set_text(&self, text: &str) {
        *self.text.lock().expect("lock") = text.into();
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _media: &Path, _work_dir: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.lock().expect("lock").clone())
    }
}

#[derive(Default)]
pub struct FakeSampler {
    pub calls: AtomicUsize,
}

#[async_trait]
impl FrameSampler for FakeSampler {
    async fn sample(
        &self,
        _video: &Path,
        offsets: &[f64],
        out_dir: &Path,
    ) -> Result<Vec<FrameExtract>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(out_dir).map_err(|e| ReelDigestError::io(out_dir, e))?;
        let mut frames = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let path = out_dir.join(format!("frame_{}.jpg", (offset * 10.0).round() as i64));
            std::fs::write(&path, b"jpeg").map_err(|e| ReelDigestError::io(&path, e))?;
            frames.push(FrameExtract {
                offset_secs: *offset,
                path,
            });
        }
        Ok(frames)
    }
}

type DelayFn = Box<dyn Fn(&Path) -> Duration + Send + Sync>;

pub struct FakeDescriber {
    delay: DelayFn,
    fail_stems: HashSet<String>,
    fail_all: bool,
    in_flight: AtomicUsize,
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for FakeDescriber {
    fn default() -> Self {
        Self::with_delay(|_| Duration::ZERO)
    }
}

impl FakeDescriber {
    pub fn with_delay(delay: impl Fn(&Path) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            delay: Box::new(delay),
            fail_stems: HashSet::new(),
            fail_all: false,
            in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, stem: &str) -> Self {
        self.fail_stems.insert(stem.to_string());
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameDescriber for FakeDescriber {
    async fn describe(&self, image: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = (self.delay)(image);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let stem = image
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if self.fail_all || self.fail_stems.contains(&stem) {
            return Err(ReelDigestError::Analyze("vision model unavailable".into()));
        }
        Ok(format!("described {stem}"))
    }
}

// ---------------------------------------------------------------------------
// Summarizer, sink, sync
// ---------------------------------------------------------------------------

pub struct FakeSummarizer {
    fail_remaining: AtomicUsize,
    delay: Mutex<Duration>,
    last: Mutex<Option<SummaryRequest>>,
    pub calls: AtomicUsize,
}

impl Default for FakeSummarizer {
    fn default() -> Self {
        Self {
            fail_remaining: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeSummarizer {
    pub fn fail_next(&self, times: usize) {
        self.fail_remaining.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = delay;
    }

    pub fn last_request(&self) -> Option<SummaryRequest> {
        self.last.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SummarizationBackend for FakeSummarizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<StructuredSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("lock") = Some(request.clone());

        let delay = *self.delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if take_one(&self.fail_remaining) {
            return Err(ReelDigestError::Summarize("model overloaded".into()));
        }
        Ok(StructuredSummary {
            summary: "Shaping a sourdough boule. Surface tension matters.".into(),
            bullet_points: vec!["Pre-shape loosely".into(), "Rest twenty minutes".into()],
            tools_and_skills: vec!["Bench scraper".into()],
            visual_observations: vec!["Floured wooden counter".into()],
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(ChatId, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(ChatId, String)> {
        self.messages.lock().expect("lock").clone()
    }

    pub fn texts_for(&self, chat_id: ChatId) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, chat_id: ChatId, text: &str) -> Result<()> {
        if self.fail {
            return Err(ReelDigestError::Notify("chat unreachable".into()));
        }
        self.messages
            .lock()
            .expect("lock")
            .push((chat_id, text.to_string()));
        Ok(())
    }
}

pub struct FakeSyncAgent {
    responses: Mutex<VecDeque<std::result::Result<SyncReceipt, SyncFailure>>>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl FakeSyncAgent {
    pub fn new(responses: Vec<std::result::Result<SyncReceipt, SyncFailure>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SyncAgent for FakeSyncAgent {
    async fn sync_artifact(
        &self,
        request: &SyncRequest,
    ) -> std::result::Result<SyncReceipt, SyncFailure> {
        self.requests.lock().expect("lock").push(request.clone());
        self.responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(SyncFailure::Failed("no scripted response".into())))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A full pipeline over fakes, a temp database and temp directories.
pub struct Harness {
    pub storage: Arc<Storage>,
    pub clock: Arc<ManualClock>,
    pub acquirer: Arc<FakeAcquirer>,
    pub transcriber: Arc<FakeTranscriber>,
    pub sampler: Arc<FakeSampler>,
    pub describer: Arc<FakeDescriber>,
    pub summarizer: Arc<FakeSummarizer>,
    pub sink: Arc<RecordingSink>,
    pub sync_agent: Option<Arc<FakeSyncAgent>>,
    pub settings: PipelineSettings,
    db_path: PathBuf,
    _root: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(TimeoutsConfig::default(), None).await
    }

    pub async fn with_timeouts(timeouts: TimeoutsConfig) -> Self {
        Self::build(timeouts, None).await
    }

    pub async fn with_sync(agent: Arc<FakeSyncAgent>) -> Self {
        Self::build(TimeoutsConfig::default(), Some(agent)).await
    }

    async fn build(timeouts: TimeoutsConfig, sync_agent: Option<Arc<FakeSyncAgent>>) -> Self {
        let root = tempfile::tempdir().expect("harness root");
        let settings = PipelineSettings {
            temp_root: root.path().join("tmp"),
            artifact_root: root.path().join("notes"),
            frames: FramesConfig::default(),
            timeouts,
            sync_title_prefix: "IG Content".into(),
        };
        let db_path = root.path().join(format!("rd_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&db_path).await.expect("open test db");
        Self {
            storage: Arc::new(storage),
            clock: Arc::new(ManualClock::default()),
            acquirer: Arc::new(FakeAcquirer::default()),
            transcriber: Arc::new(FakeTranscriber::default()),
            sampler: Arc::new(FakeSampler::default()),
            describer: Arc::new(FakeDescriber::default()),
            summarizer: Arc::new(FakeSummarizer::default()),
            sink: Arc::new(RecordingSink::default()),
            sync_agent,
            settings,
            db_path,
            _root: root,
        }
    }

    /// A second handle on the harness database that rejects every write.
    pub async fn readonly_storage(&self) -> Arc<Storage> {
        Arc::new(Storage::open_readonly(&self.db_path).await.expect("open read-only"))
    }

    fn shared_clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let collaborators = Collaborators {
            acquirer: self.acquirer.clone(),
            transcriber: self.transcriber.clone(),
            sampler: self.sampler.clone(),
            describer: self.describer.clone(),
            summarizer: self.summarizer.clone(),
            sync_agent: self
                .sync_agent
                .clone()
                .map(|agent| agent as Arc<dyn SyncAgent>),
        };
        Orchestrator::new(
            collaborators,
            self.storage.clone(),
            self.shared_clock(),
            self.settings.clone(),
        )
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.sink.clone(), Duration::from_secs(1))
    }

    pub fn service(&self) -> DigestService {
        DigestService::new(
            self.storage.clone(),
            Arc::new(self.orchestrator()),
            self.notifier(),
            self.shared_clock(),
        )
    }

    pub fn scheduler(&self, max_retries: u32) -> RetryScheduler {
        self.scheduler_with_interval(max_retries, Duration::from_secs(3600))
    }

    pub fn scheduler_with_interval(&self, max_retries: u32, interval: Duration) -> RetryScheduler {
        RetryScheduler::new(
            self.storage.clone(),
            Arc::new(self.orchestrator()),
            self.notifier(),
            self.shared_clock(),
            max_retries,
            interval,
        )
    }

    pub async fn reserved_job(&self, key: &str) -> Job {
        self.reserved_job_of(key, ContentType::Reel).await
    }

    /// A job whose URL is already claimed, as the intake gate would leave it.
    pub async fn reserved_job_of(&self, key: &str, content_type: ContentType) -> Job {
        let job = Job::new(
            NormalizedUrl {
                key: key.into(),
                content_type,
            },
            1,
        );
        let reserved = self
            .storage
            .reserve(key, job.id, job.chat_id, self.clock.now())
            .await
            .expect("reserve");
        assert!(reserved, "{key} already claimed");
        job
    }
}
