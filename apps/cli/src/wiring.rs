//! Builds the service graph from a loaded config.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use tracing::{debug, info, warn};

use reeldigest_core::adapters::production_collaborators;
use reeldigest_core::collaborators::NotificationSink;
use reeldigest_core::{
    Clock, DigestService, LogNotifier, Notifier, Orchestrator, PipelineSettings, RetryScheduler,
    StageObserver, SystemClock,
};
use reeldigest_shared::{AppConfig, expand_home, telegram_token};
use reeldigest_storage::Storage;

use crate::telegram::TelegramNotifier;

/// Everything a command needs, wired once.
pub(crate) struct App {
    pub config: Arc<AppConfig>,
    pub storage: Arc<Storage>,
    pub service: Arc<DigestService>,
    pub scheduler: Arc<RetryScheduler>,
}

pub(crate) async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.storage.database_path);
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("failed to open database at {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Telegram when a bot token is available, the log otherwise.
pub(crate) fn notification_sink(config: &AppConfig) -> Result<Arc<dyn NotificationSink>> {
    match telegram_token(config) {
        Ok(token) => {
            let sink = TelegramNotifier::new(&config.telegram.api_base, &token)?;
            info!("notifications go to Telegram");
            Ok(Arc::new(sink))
        }
        Err(e) => {
            warn!(error = %e, "notifications go to the log");
            Ok(Arc::new(LogNotifier))
        }
    }
}

pub(crate) async fn build(
    config: AppConfig,
    sink: Arc<dyn NotificationSink>,
    observer: Option<Arc<dyn StageObserver>>,
) -> Result<App> {
    let config = Arc::new(config);
    let storage = open_storage(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let collaborators =
        production_collaborators(&config).wrap_err("failed to set up collaborators")?;
    let mut orchestrator = Orchestrator::new(
        collaborators,
        storage.clone(),
        clock.clone(),
        PipelineSettings::from_config(&config),
    );
    if let Some(observer) = observer {
        orchestrator = orchestrator.with_observer(observer);
    }
    debug!(backend = orchestrator.backend_name(), "pipeline wired");
    let orchestrator = Arc::new(orchestrator);

    let notifier = Notifier::new(sink, Duration::from_secs(config.timeouts.notify));
    let service = Arc::new(DigestService::new(
        storage.clone(),
        orchestrator.clone(),
        notifier.clone(),
        clock.clone(),
    ));
    let scheduler = Arc::new(RetryScheduler::new(
        storage.clone(),
        orchestrator,
        notifier,
        clock,
        config.retry.max_retries,
        config.retry.interval(),
    ));

    Ok(App {
        config,
        storage,
        service,
        scheduler,
    })
}
