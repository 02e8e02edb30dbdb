//! Periodic retry of failed jobs.
//!
//! Each tick sweeps the pending failure records oldest first and restarts
//! each one from `Received`. A record is retried at most `max_retries` times;
//! after that it is abandoned and the user is told once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use reeldigest_shared::{DedupEntry, FailedJob, Result};
use reeldigest_storage::{RetryOutcome, Storage};

use crate::clock::Clock;
use crate::job::{Job, JobState};
use crate::notify::{Notifier, format_abandoned, format_completed};
use crate::orchestrator::{JobOutcome, Orchestrator};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records re-run through the pipeline.
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed again, still under the bound.
    pub failed: usize,
    pub abandoned: usize,
    /// Left alone this tick because a live job holds the URL.
    pub skipped: usize,
    /// Closed without a retry because the URL completed some other way.
    pub resolved: usize,
    /// Records whose bookkeeping hit a store error.
    pub errors: usize,
}

pub struct RetryScheduler {
    storage: Arc<Storage>,
    orchestrator: Arc<Orchestrator>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    interval: Duration,
}

impl RetryScheduler {
    pub fn new(
        storage: Arc<Storage>,
        orchestrator: Arc<Orchestrator>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        max_retries: u32,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            orchestrator,
            notifier,
            clock,
            max_retries,
            interval,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep on a fixed period until `cancel` fires. The first sweep runs
    /// one interval after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            max_retries = self.max_retries,
            "retry scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("retry scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "retry sweep failed, will try again next tick");
                    }
                }
            }
        }
    }

    /// Process every pending record created up to now.
    #[instrument(skip_all)]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let pending = self.storage.list_pending(self.clock.now()).await?;
        let mut report = SweepReport::default();

        for record in &pending {
            if let Err(e) = self.retry_record(record, &mut report).await {
                report.errors += 1;
                error!(failure_id = record.id, url = %record.url, error = %e, "retry bookkeeping failed");
            }
        }

        info!(
            pending = pending.len(),
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            abandoned = report.abandoned,
            skipped = report.skipped,
            resolved = report.resolved,
            errors = report.errors,
            "retry sweep finished"
        );
        Ok(report)
    }

    async fn retry_record(&self, record: &FailedJob, report: &mut SweepReport) -> Result<()> {
        if record.retry_count >= self.max_retries {
            let abandoned = self.storage.mark_abandoned(record.id, self.clock.now()).await?;
            report.abandoned += 1;
            warn!(failure_id = record.id, url = %record.url, "retry bound already reached, abandoned");
            self.notifier
                .send(record.chat_id, &format_abandoned(&abandoned, self.max_retries))
                .await;
            return Ok(());
        }

        match self.storage.lookup(&record.url).await? {
            Some(DedupEntry::Completed(_)) => {
                self.storage.mark_resolved(record.id, self.clock.now()).await?;
                report.resolved += 1;
                info!(failure_id = record.id, url = %record.url, "already completed elsewhere");
                return Ok(());
            }
            Some(DedupEntry::InFlight(_)) => {
                report.skipped += 1;
                debug!(failure_id = record.id, url = %record.url, "live job in flight, skipping");
                return Ok(());
            }
            None => {}
        }

        let job = Job::for_retry(record);
        let job_id = job.id;
        if !self
            .storage
            .reserve(&record.url, job_id, record.chat_id, self.clock.now())
            .await?
        {
            report.skipped += 1;
            return Ok(());
        }

        report.attempted += 1;
        info!(failure_id = record.id, url = %record.url, attempt = job.attempt, "retrying");
        let run = self.orchestrator.run(job).await;

        match run.outcome {
            JobOutcome::Completed(done) => {
                self.storage
                    .mark_retried(record.id, &RetryOutcome::Succeeded, self.clock.now())
                    .await?;
                report.succeeded += 1;
                let message = format_completed(&done.record, &done.summary, &done.sync, true);
                self.notifier.send(record.chat_id, &message).await;
            }
            JobOutcome::Failed { stage, error } => {
                if let Err(e) = self.storage.release(&record.url, job_id).await {
                    error!(url = %record.url, error = %e, "failed to release reservation");
                }
                let outcome = RetryOutcome::Failed {
                    stage,
                    detail: error.to_string(),
                };
                let updated = self
                    .storage
                    .mark_retried(record.id, &outcome, self.clock.now())
                    .await?;

                if updated.retry_count >= self.max_retries {
                    let mut job = run.job;
                    if let Err(e) = job.advance(JobState::Abandoned) {
                        warn!(error = %e, "job state not updated");
                    }
                    let abandoned = self.storage.mark_abandoned(record.id, self.clock.now()).await?;
                    report.abandoned += 1;
                    warn!(
                        failure_id = record.id,
                        url = %record.url,
                        retries = updated.retry_count,
                        "giving up"
                    );
                    self.notifier
                        .send(record.chat_id, &format_abandoned(&abandoned, self.max_retries))
                        .await;
                } else {
                    report.failed += 1;
                    debug!(
                        failure_id = record.id,
                        retries = updated.retry_count,
                        stage = %stage,
                        "retry failed, will try again"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use reeldigest_shared::{FailureStatus, JobId, Stage};

    use super::*;
    use crate::intake::Admission;
    use crate::testing::Harness;

    async fn fail_live(h: &Harness, url: &str) -> i64 {
        let service = h.service();
        let job = match service.submit(url, 21).await.expect("submit") {
            Admission::Accepted(job) => job,
            other => panic!("expected accepted, got {other:?}"),
        };
        service.process(job).await;
        let pending = h.storage.list_pending(h.clock.now()).await.expect("pending");
        pending
            .iter()
            .find(|r| r.url == url)
            .map(|r| r.id)
            .expect("failure recorded")
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_next_sweep() {
        let h = Harness::new().await;
        h.acquirer.fail_next(1);
        let id = fail_live(&h, "instagram.com/reel/flaky").await;

        h.clock.advance(chrono::Duration::hours(1));
        let report = h.scheduler(3).sweep().await.expect("sweep");
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);

        let record = h.storage.get_failure(id).await.expect("get").expect("exists");
        assert_eq!(record.status, FailureStatus::Succeeded);
        assert_eq!(record.retry_count, 1);
        assert!(matches!(
            h.storage.lookup("instagram.com/reel/flaky").await.expect("lookup"),
            Some(DedupEntry::Completed(_))
        ));

        let texts = h.sink.texts_for(21);
        assert!(texts.last().expect("message").starts_with("✅ Retry succeeded"));
        assert_eq!(h.acquirer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_failure_is_abandoned_after_bound() {
        let h = Harness::new().await;
        h.acquirer.fail_next(usize::MAX);
        let id = fail_live(&h, "instagram.com/reel/gone").await;
        let scheduler = h.scheduler(3);

        for round in 1..=3u32 {
            h.clock.advance(chrono::Duration::hours(1));
            let report = scheduler.sweep().await.expect("sweep");
            assert_eq!(report.attempted, 1, "round {round}");
            let record = h.storage.get_failure(id).await.expect("get").expect("exists");
            assert_eq!(record.retry_count, round);
            if round < 3 {
                assert_eq!(report.failed, 1);
                assert_eq!(record.status, FailureStatus::Pending);
            } else {
                assert_eq!(report.abandoned, 1);
                assert_eq!(record.status, FailureStatus::Abandoned);
            }
        }

        h.clock.advance(chrono::Duration::hours(1));
        let report = scheduler.sweep().await.expect("sweep");
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.acquirer.calls.load(Ordering::SeqCst), 4);

        let texts = h.sink.texts_for(21);
        let abandon_notices = texts.iter().filter(|t| t.contains("Giving up")).count();
        assert_eq!(abandon_notices, 1);
        // Intermediate retry failures stay silent: ack, queued, abandoned.
        assert_eq!(texts.len(), 3);

        // Abandoned means neither completed nor held: the URL is free again
        assert!(h.storage.lookup("instagram.com/reel/gone").await.expect("lookup").is_none());
        assert!(
            h.storage
                .get_processed("instagram.com/reel/gone")
                .await
                .expect("get")
                .is_none()
        );
        assert!(matches!(
            h.service().submit("instagram.com/reel/gone", 21).await.expect("resubmit"),
            Admission::Accepted(_)
        ));
    }

    #[tokio::test]
    async fn in_flight_url_is_skipped_untouched() {
        let h = Harness::new().await;
        h.acquirer.fail_next(1);
        let id = fail_live(&h, "instagram.com/reel/busy").await;

        assert!(
            h.storage
                .reserve("instagram.com/reel/busy", JobId::new(), 21, h.clock.now())
                .await
                .expect("reserve")
        );
        let report = h.scheduler(3).sweep().await.expect("sweep");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);

        let record = h.storage.get_failure(id).await.expect("get").expect("exists");
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.status, FailureStatus::Pending);
    }

    #[tokio::test]
    async fn url_completed_elsewhere_is_resolved() {
        let h = Harness::new().await;
        h.acquirer.fail_next(1);
        let id = fail_live(&h, "instagram.com/reel/again").await;

        let service = h.service();
        let job = match service.submit("instagram.com/reel/again", 21).await.expect("submit") {
            Admission::Accepted(job) => job,
            other => panic!("expected accepted, got {other:?}"),
        };
        service.process(job).await;

        let report = h.scheduler(3).sweep().await.expect("sweep");
        assert_eq!(report.resolved, 1);
        assert_eq!(report.attempted, 0);
        let record = h.storage.get_failure(id).await.expect("get").expect("exists");
        assert_eq!(record.status, FailureStatus::Succeeded);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn lowered_bound_abandons_without_rerun() {
        let h = Harness::new().await;
        h.acquirer.fail_next(usize::MAX);
        let id = fail_live(&h, "instagram.com/reel/old").await;
        h.clock.advance(chrono::Duration::hours(1));
        h.scheduler(3).sweep().await.expect("first sweep");

        let report = h.scheduler(1).sweep().await.expect("sweep");
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.attempted, 0);
        let record = h.storage.get_failure(id).await.expect("get").expect("exists");
        assert_eq!(record.status, FailureStatus::Abandoned);
        assert_eq!(record.stage, Stage::Download);
    }

    #[tokio::test]
    async fn run_loop_sweeps_until_cancelled() {
        let h = Harness::new().await;
        h.acquirer.fail_next(1);
        let id = fail_live(&h, "instagram.com/reel/loop").await;

        let scheduler = Arc::new(h.scheduler_with_interval(3, Duration::from_millis(50)));
        let cancel = CancellationToken::new();
        let task = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        let mut status = FailureStatus::Pending;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = h.storage.get_failure(id).await.expect("get").expect("exists").status;
            if status != FailureStatus::Pending {
                break;
            }
        }
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler stops")
            .expect("join");
        assert_eq!(status, FailureStatus::Succeeded);
    }
}
