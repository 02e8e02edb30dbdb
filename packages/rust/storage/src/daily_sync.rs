//! Daily knowledge-base sync records and the sync issue log.

use chrono::{DateTime, NaiveDate, Utc};
use libsql::params;
use reeldigest_shared::{DailySyncRecord, ReelDigestError, Result, SyncIssue};

use crate::{Storage, db_err, get_time, to_db_time};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl Storage {
    /// The external resource collecting `date`'s artifacts, if one exists.
    pub async fn get_daily_sync(&self, date: NaiveDate) -> Result<Option<DailySyncRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT date, external_id, external_title, item_count, created_at, updated_at
                 FROM daily_sync WHERE date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_daily_sync(&row)?)),
            None => Ok(None),
        }
    }

    /// Count one more item synced into `external_id` for `date`.
    ///
    /// A different `external_id` than the stored one means the resource was
    /// recreated; the count restarts at one.
    pub async fn record_daily_sync(
        &self,
        date: NaiveDate,
        external_id: &str,
        external_title: &str,
        now: DateTime<Utc>,
    ) -> Result<DailySyncRecord> {
        self.check_writable()?;
        let mut rows = self
            .conn
            .query(
                "INSERT INTO daily_sync
                    (date, external_id, external_title, item_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(date) DO UPDATE SET
                    item_count = CASE WHEN daily_sync.external_id = excluded.external_id
                                      THEN daily_sync.item_count + 1 ELSE 1 END,
                    created_at = CASE WHEN daily_sync.external_id = excluded.external_id
                                      THEN daily_sync.created_at ELSE excluded.created_at END,
                    external_id = excluded.external_id,
                    external_title = excluded.external_title,
                    updated_at = excluded.updated_at
                 RETURNING date, external_id, external_title, item_count, created_at, updated_at",
                params![
                    date.format(DATE_FORMAT).to_string(),
                    external_id,
                    external_title,
                    to_db_time(&now)
                ],
            )
            .await
            .map_err(db_err)?;

        let row = rows
            .next()
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReelDigestError::Storage("daily sync upsert returned no row".into()))?;
        row_to_daily_sync(&row)
    }

    /// Forget `date`'s resource after the sync agent reported it missing.
    pub async fn invalidate_daily_sync(&self, date: NaiveDate) -> Result<bool> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM daily_sync WHERE date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    /// Append a sync failure for manual follow-up.
    pub async fn record_sync_issue(&self, issue: &SyncIssue) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO sync_issues (url, chat_id, error, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    issue.url.as_str(),
                    issue.chat_id,
                    issue.error.as_str(),
                    to_db_time(&issue.created_at)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Most recent sync issues first.
    pub async fn list_sync_issues(&self, limit: u32) -> Result<Vec<SyncIssue>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, chat_id, error, created_at FROM sync_issues
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(SyncIssue {
                url: row.get(0).map_err(db_err)?,
                chat_id: row.get(1).map_err(db_err)?,
                error: row.get(2).map_err(db_err)?,
                created_at: get_time(&row, 3)?,
            });
        }
        Ok(results)
    }
}

fn row_to_daily_sync(row: &libsql::Row) -> Result<DailySyncRecord> {
    let date: String = row.get(0).map_err(db_err)?;
    Ok(DailySyncRecord {
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| ReelDigestError::Storage(format!("invalid sync date {date:?}: {e}")))?,
        external_id: row.get(1).map_err(db_err)?,
        external_title: row.get(2).map_err(db_err)?,
        item_count: row.get::<u32>(3).map_err(db_err)?,
        created_at: get_time(row, 4)?,
        updated_at: get_time(row, 5)?,
    })
}
