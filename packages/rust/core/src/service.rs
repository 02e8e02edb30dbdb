//! Submission handling for live jobs.
//!
//! Ties the intake gate, the orchestrator, the failure store and the
//! notifier together. Retries go through [`crate::retry::RetryScheduler`]
//! instead.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use reeldigest_shared::{ChatId, NewFailure, ReelDigestError, Result};
use reeldigest_storage::Storage;

use crate::clock::Clock;
use crate::intake::{Admission, IntakeGate};
use crate::job::Job;
use crate::notify::{
    Notifier, format_completed, format_duplicate, format_in_progress, format_not_queued,
    format_processing, format_queued, format_validation,
};
use crate::orchestrator::{JobOutcome, JobReport, Orchestrator};

pub struct DigestService {
    gate: IntakeGate,
    orchestrator: Arc<Orchestrator>,
    storage: Arc<Storage>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl DigestService {
    pub fn new(
        storage: Arc<Storage>,
        orchestrator: Arc<Orchestrator>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: IntakeGate::new(storage.clone(), clock.clone()),
            orchestrator,
            storage,
            notifier,
            clock,
        }
    }

    /// Drop reservations left behind by a previous process. Their jobs died
    /// with it, so the URLs would otherwise stay blocked forever.
    pub async fn clear_stale_reservations(&self) -> Result<u64> {
        let cleared = self.storage.clear_reservations().await?;
        if cleared > 0 {
            warn!(cleared, "cleared stale reservations from a previous run");
        }
        Ok(cleared)
    }

    /// Pass a submission through the gate and tell the user what happened.
    ///
    /// An accepted job is returned to the caller, who decides whether to run
    /// it inline ([`Self::process`]) or in the background ([`Self::spawn`]).
    #[instrument(skip_all, fields(chat_id = %chat_id))]
    pub async fn submit(&self, raw: &str, chat_id: ChatId) -> Result<Admission> {
        let admission = match self.gate.admit(raw, chat_id).await {
            Ok(admission) => admission,
            Err(err @ ReelDigestError::Validation { .. }) => {
                info!(error = %err, "submission rejected");
                self.notifier.send(chat_id, &format_validation(&err)).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let message = match &admission {
            Admission::Accepted(job) => format_processing(&job.url),
            Admission::AlreadyProcessed(record) => format_duplicate(record),
            Admission::InProgress(url) => format_in_progress(url),
        };
        self.notifier.send(chat_id, &message).await;
        Ok(admission)
    }

    /// Run an accepted job to completion. A failed job is queued for retry
    /// and its reservation released.
    pub async fn process(&self, job: Job) -> JobReport {
        let chat_id = job.chat_id;
        let url = job.url.clone();
        let job_id = job.id;

        let report = self.orchestrator.run(job).await;
        match &report.outcome {
            JobOutcome::Completed(done) => {
                let message = format_completed(&done.record, &done.summary, &done.sync, false);
                self.notifier.send(chat_id, &message).await;
            }
            JobOutcome::Failed { stage, error } => {
                let failure = NewFailure {
                    url: url.key.clone(),
                    content_type: url.content_type,
                    chat_id,
                    stage: *stage,
                    error_detail: error.to_string(),
                    created_at: self.clock.now(),
                };
                let message = match self.storage.enqueue(&failure).await {
                    Ok(record) => {
                        info!(
                            failure_id = record.id,
                            url = %url.key,
                            stage = %stage,
                            "queued for retry"
                        );
                        format_queued(&url.key, *stage, &error.to_string())
                    }
                    Err(e) => {
                        error!(url = %url.key, error = %e, "failed to queue job for retry");
                        format_not_queued(&url.key, *stage, &error.to_string())
                    }
                };
                if let Err(e) = self.storage.release(&url.key, job_id).await {
                    error!(url = %url.key, error = %e, "failed to release reservation");
                }
                self.notifier.send(chat_id, &message).await;
            }
        }
        report
    }

    /// Run an accepted job on its own task.
    pub fn spawn(self: &Arc<Self>, job: Job) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.process(job).await;
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }
}
