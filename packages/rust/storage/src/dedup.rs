//! Deduplication store: completed URLs and in-flight reservations.

use chrono::{DateTime, Utc};
use libsql::params;
use reeldigest_shared::{ChatId, DedupEntry, JobId, ProcessedUrl, Reservation, ReelDigestError, Result};

use crate::{Storage, db_err, get_parsed, get_time, to_db_time};

impl Storage {
    /// Claim `url` for a job. Returns `false` if the URL is already completed
    /// or another job holds the claim.
    ///
    /// This is one statement, so two concurrent callers can never both win.
    pub async fn reserve(
        &self,
        url: &str,
        job_id: JobId,
        chat_id: ChatId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO url_reservations (url, job_id, chat_id, reserved_at)
                 SELECT ?1, ?2, ?3, ?4
                 WHERE NOT EXISTS (SELECT 1 FROM processed_urls WHERE url = ?1)
                 ON CONFLICT(url) DO NOTHING",
                params![url, job_id.to_string(), chat_id, to_db_time(&now)],
            )
            .await
            .map_err(db_err)?;
        Ok(inserted == 1)
    }

    /// Record a completed URL. The `processed_urls_release_reservation`
    /// trigger drops the reservation as part of the same statement.
    pub async fn complete(&self, record: &ProcessedUrl) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO processed_urls
                    (url, content_type, title, chat_id, artifact_path, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.url.as_str(),
                    record.content_type.as_str(),
                    record.title.as_str(),
                    record.chat_id,
                    record.artifact_path.to_string_lossy().to_string(),
                    to_db_time(&record.processed_at)
                ],
            )
            .await
            .map_err(|e| {
                ReelDigestError::Storage(format!("failed to record {}: {e}", record.url))
            })?;
        Ok(())
    }

    /// Look up a URL: completed record first, then any live reservation.
    pub async fn lookup(&self, url: &str) -> Result<Option<DedupEntry>> {
        if let Some(record) = self.get_processed(url).await? {
            return Ok(Some(DedupEntry::Completed(record)));
        }

        let mut rows = self
            .conn
            .query(
                "SELECT url, job_id, chat_id, reserved_at FROM url_reservations WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let job_id: String = row.get(1).map_err(db_err)?;
                Ok(Some(DedupEntry::InFlight(Reservation {
                    url: row.get(0).map_err(db_err)?,
                    job_id: job_id
                        .parse()
                        .map_err(|e| ReelDigestError::Storage(format!("invalid job id: {e}")))?,
                    chat_id: row.get(2).map_err(db_err)?,
                    reserved_at: get_time(&row, 3)?,
                })))
            }
            None => Ok(None),
        }
    }

    /// Get the completed record for a URL, if any.
    pub async fn get_processed(&self, url: &str) -> Result<Option<ProcessedUrl>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, content_type, title, chat_id, artifact_path, processed_at
                 FROM processed_urls WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_processed(&row)?)),
            None => Ok(None),
        }
    }

    /// Drop a reservation held by `job_id`. Returns whether one was removed.
    pub async fn release(&self, url: &str, job_id: JobId) -> Result<bool> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM url_reservations WHERE url = ?1 AND job_id = ?2",
                params![url, job_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    /// Remove every reservation. Only safe at startup, before any job runs.
    pub async fn clear_reservations(&self) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute("DELETE FROM url_reservations", params![])
            .await
            .map_err(db_err)?;
        if removed > 0 {
            tracing::warn!(removed, "cleared stale URL reservations");
        }
        Ok(removed)
    }
}

fn row_to_processed(row: &libsql::Row) -> Result<ProcessedUrl> {
    let artifact_path: String = row.get(4).map_err(db_err)?;
    Ok(ProcessedUrl {
        url: row.get(0).map_err(db_err)?,
        content_type: get_parsed(row, 1)?,
        title: row.get(2).map_err(db_err)?,
        chat_id: row.get(3).map_err(db_err)?,
        artifact_path: artifact_path.into(),
        processed_at: get_time(row, 5)?,
    })
}
