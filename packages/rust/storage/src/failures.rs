//! Failure record store: the durable queue behind the retry sweep.
//!
//! Status only moves `pending -> succeeded` or `pending -> abandoned`; every
//! update is guarded on `status = 'pending'` so a terminal record is never
//! touched again.

use chrono::{DateTime, Utc};
use libsql::params;
use reeldigest_shared::{FailedJob, NewFailure, ReelDigestError, Result, Stage};

use crate::{Storage, db_err, get_parsed, get_time, parse_db_time, to_db_time};

const FAILED_JOB_COLUMNS: &str = "id, url, content_type, chat_id, stage, error_detail, \
     retry_count, created_at, last_retry_at, status";

/// Result of one retry attempt, as recorded by the sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Succeeded,
    Failed { stage: Stage, detail: String },
}

impl Storage {
    /// Queue a failure. If the URL already has a pending record, that record
    /// takes the new stage and detail and keeps its retry count.
    pub async fn enqueue(&self, failure: &NewFailure) -> Result<FailedJob> {
        self.check_writable()?;
        let sql = format!(
            "INSERT INTO failed_jobs
                (url, content_type, chat_id, stage, error_detail, retry_count, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 'pending')
             ON CONFLICT(url) WHERE status = 'pending' DO UPDATE SET
                stage = excluded.stage,
                error_detail = excluded.error_detail
             RETURNING {FAILED_JOB_COLUMNS}"
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![
                    failure.url.as_str(),
                    failure.content_type.as_str(),
                    failure.chat_id,
                    failure.stage.as_str(),
                    failure.error_detail.as_str(),
                    to_db_time(&failure.created_at)
                ],
            )
            .await
            .map_err(db_err)?;

        let row = rows
            .next()
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReelDigestError::Storage("enqueue returned no row".into()))?;
        let job = row_to_failed_job(&row)?;
        tracing::debug!(failure_id = job.id, url = %job.url, stage = %job.stage, "failure queued");
        Ok(job)
    }

    /// Get a failure record by id.
    pub async fn get_failure(&self, id: i64) -> Result<Option<FailedJob>> {
        let sql = format!("SELECT {FAILED_JOB_COLUMNS} FROM failed_jobs WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_failed_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Pending records created at or before `now`, oldest first.
    pub async fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<FailedJob>> {
        let sql = format!(
            "SELECT {FAILED_JOB_COLUMNS} FROM failed_jobs
             WHERE status = 'pending' AND created_at <= ?1
             ORDER BY created_at, id"
        );
        let mut rows = self
            .conn
            .query(&sql, params![to_db_time(&now)])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_failed_job(&row)?);
        }
        Ok(results)
    }

    /// Record one retry attempt: bumps `retry_count`, stamps `last_retry_at`,
    /// and either closes the record as succeeded or refreshes the failure.
    pub async fn mark_retried(
        &self,
        id: i64,
        outcome: &RetryOutcome,
        now: DateTime<Utc>,
    ) -> Result<FailedJob> {
        self.check_writable()?;
        let mut rows = match outcome {
            RetryOutcome::Succeeded => {
                let sql = format!(
                    "UPDATE failed_jobs SET
                        retry_count = retry_count + 1,
                        last_retry_at = ?2,
                        status = 'succeeded'
                     WHERE id = ?1 AND status = 'pending'
                     RETURNING {FAILED_JOB_COLUMNS}"
                );
                self.conn
                    .query(&sql, params![id, to_db_time(&now)])
                    .await
            }
            RetryOutcome::Failed { stage, detail } => {
                let sql = format!(
                    "UPDATE failed_jobs SET
                        retry_count = retry_count + 1,
                        last_retry_at = ?2,
                        stage = ?3,
                        error_detail = ?4
                     WHERE id = ?1 AND status = 'pending'
                     RETURNING {FAILED_JOB_COLUMNS}"
                );
                self.conn
                    .query(
                        &sql,
                        params![id, to_db_time(&now), stage.as_str(), detail.as_str()],
                    )
                    .await
            }
        }
        .map_err(db_err)?;

        self.single_pending_update(&mut rows, id).await
    }

    /// Close a pending record as succeeded without counting a retry, for a URL
    /// that completed through another path.
    pub async fn mark_resolved(&self, id: i64, now: DateTime<Utc>) -> Result<FailedJob> {
        self.check_writable()?;
        let sql = format!(
            "UPDATE failed_jobs SET status = 'succeeded', last_retry_at = ?2
             WHERE id = ?1 AND status = 'pending'
             RETURNING {FAILED_JOB_COLUMNS}"
        );
        let mut rows = self
            .conn
            .query(&sql, params![id, to_db_time(&now)])
            .await
            .map_err(db_err)?;
        self.single_pending_update(&mut rows, id).await
    }

    /// Give up on a pending record. It stays in the table for operators.
    pub async fn mark_abandoned(&self, id: i64, now: DateTime<Utc>) -> Result<FailedJob> {
        self.check_writable()?;
        let sql = format!(
            "UPDATE failed_jobs SET status = 'abandoned',
                last_retry_at = COALESCE(last_retry_at, ?2)
             WHERE id = ?1 AND status = 'pending'
             RETURNING {FAILED_JOB_COLUMNS}"
        );
        let mut rows = self
            .conn
            .query(&sql, params![id, to_db_time(&now)])
            .await
            .map_err(db_err)?;
        self.single_pending_update(&mut rows, id).await
    }

    async fn single_pending_update(&self, rows: &mut libsql::Rows, id: i64) -> Result<FailedJob> {
        match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_failed_job(&row),
            None => Err(ReelDigestError::Storage(format!(
                "failure {id} does not exist or is no longer pending"
            ))),
        }
    }
}

fn row_to_failed_job(row: &libsql::Row) -> Result<FailedJob> {
    Ok(FailedJob {
        id: row.get(0).map_err(db_err)?,
        url: row.get(1).map_err(db_err)?,
        content_type: get_parsed(row, 2)?,
        chat_id: row.get(3).map_err(db_err)?,
        stage: get_parsed(row, 4)?,
        error_detail: row.get(5).map_err(db_err)?,
        retry_count: row.get::<u32>(6).map_err(db_err)?,
        created_at: get_time(row, 7)?,
        last_retry_at: match row.get::<String>(8).ok() {
            Some(s) => Some(parse_db_time(&s)?),
            None => None,
        },
        status: get_parsed(row, 9)?,
    })
}
