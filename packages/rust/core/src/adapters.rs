//! Production collaborators built from configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use reeldigest_media::{
    AcquiredMedia, FrameExtract, FrameExtractor, Ffprobe, OllamaVision, WhisperCli, YtDlp,
};
use reeldigest_shared::{AppConfig, Result, expand_home};
use reeldigest_summarize::Summarizer;

use crate::collaborators::{FrameDescriber, FrameSampler, MediaAcquirer, SyncAgent, Transcriber};
use crate::orchestrator::Collaborators;
use crate::sync::CommandSyncAgent;

#[async_trait]
impl MediaAcquirer for YtDlp {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<AcquiredMedia> {
        YtDlp::fetch(self, url, dest).await
    }
}

#[async_trait]
impl Transcriber for WhisperCli {
    async fn transcribe(&self, media: &Path, work_dir: &Path) -> Result<String> {
        WhisperCli::transcribe(self, media, work_dir).await
    }
}

#[async_trait]
impl FrameSampler for FrameExtractor {
    async fn sample(
        &self,
        video: &Path,
        offsets: &[f64],
        out_dir: &Path,
    ) -> Result<Vec<FrameExtract>> {
        self.extract(video, offsets, out_dir).await
    }
}

#[async_trait]
impl FrameDescriber for OllamaVision {
    async fn describe(&self, image: &Path) -> Result<String> {
        OllamaVision::describe(self, image).await
    }
}

/// Build the real yt-dlp / whisper / ffmpeg / Ollama / summarizer stack.
pub fn production_collaborators(config: &AppConfig) -> Result<Collaborators> {
    let probe = Ffprobe::new(&config.transcription.ffprobe);
    let cookies = Some(config.acquisition.cookies_file.trim())
        .filter(|c| !c.is_empty())
        .map(expand_home);

    let acquirer = YtDlp::new(&config.acquisition.command, cookies, probe);
    let transcriber = WhisperCli::new(
        &config.transcription.command,
        expand_home(&config.transcription.model_path),
        &config.transcription.language,
        &config.transcription.ffmpeg,
    );
    let sampler = FrameExtractor::new(&config.transcription.ffmpeg);
    let describer = OllamaVision::new(
        &config.vision.host,
        &config.vision.model,
        Duration::from_secs(config.timeouts.frame),
    )?;
    let summarizer = Summarizer::from_config(
        &config.summarizer,
        Duration::from_secs(config.timeouts.summarize),
    )?;

    let sync_agent = config.sync.enabled.then(|| {
        Arc::new(CommandSyncAgent::new(
            config.sync.command.clone(),
            config.sync.args.clone(),
        )) as Arc<dyn SyncAgent>
    });

    Ok(Collaborators {
        acquirer: Arc::new(acquirer),
        transcriber: Arc::new(transcriber),
        sampler: Arc::new(sampler),
        describer: Arc::new(describer),
        summarizer: Arc::new(summarizer),
        sync_agent,
    })
}
