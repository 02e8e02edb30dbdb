//! Per-download size log.

use libsql::params;
use reeldigest_shared::{DownloadLogEntry, ReelDigestError, Result};

use crate::{Storage, db_err, get_parsed, get_time, to_db_time};

impl Storage {
    /// Append one acquisition to the download log.
    pub async fn record_download(&self, entry: &DownloadLogEntry) -> Result<()> {
        self.check_writable()?;
        let image_bytes = serde_json::to_string(&entry.image_bytes)
            .map_err(|e| ReelDigestError::Storage(format!("failed to encode image sizes: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO download_log
                    (url, content_type, title, video_bytes, audio_bytes, image_bytes,
                     total_bytes, downloaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.url.as_str(),
                    entry.content_type.as_str(),
                    entry.title.as_str(),
                    entry.video_bytes as i64,
                    entry.audio_bytes as i64,
                    image_bytes,
                    entry.total_bytes() as i64,
                    to_db_time(&entry.downloaded_at)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Download log entries for `url`, oldest first.
    pub async fn downloads_for(&self, url: &str) -> Result<Vec<DownloadLogEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, content_type, title, video_bytes, audio_bytes, image_bytes,
                        downloaded_at
                 FROM download_log WHERE url = ?1 ORDER BY id",
                params![url],
            )
            .await
            .map_err(db_err)?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let image_bytes: String = row.get(5).map_err(db_err)?;
            entries.push(DownloadLogEntry {
                url: row.get(0).map_err(db_err)?,
                content_type: get_parsed(&row, 1)?,
                title: row.get(2).map_err(db_err)?,
                video_bytes: row.get::<i64>(3).map_err(db_err)? as u64,
                audio_bytes: row.get::<i64>(4).map_err(db_err)? as u64,
                image_bytes: serde_json::from_str(&image_bytes).map_err(|e| {
                    ReelDigestError::Storage(format!("invalid image sizes {image_bytes:?}: {e}"))
                })?,
                downloaded_at: get_time(&row, 6)?,
            });
        }
        Ok(entries)
    }
}
