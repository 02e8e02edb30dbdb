//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding the deduplication
//! records, in-flight URL reservations, the failure queue, the download log
//! and the daily knowledge-base sync bookkeeping.
//!
//! One connection is shared by every task, so every mutation is a single
//! statement (triggers included) and never an explicit transaction.
//! Uniqueness constraints decide races.
//!
//! **Access rules:**
//! - The service and one-shot CLI commands: read-write via [`Storage::open`]
//! - `stats` and other inspection: read-only via [`Storage::open_readonly`]

mod daily_sync;
mod dedup;
mod downloads;
mod failures;
mod migrations;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use reeldigest_shared::{JobStats, ReelDigestError, Result};

pub use failures::RetryOutcome;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReelDigestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ReelDigestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ReelDigestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Counts for the stats endpoint.
    pub async fn stats(&self) -> Result<JobStats> {
        let mut stats = JobStats {
            completed: self.count("SELECT COUNT(*) FROM processed_urls").await?,
            sync_issues: self.count("SELECT COUNT(*) FROM sync_issues").await?,
            downloads: self.count("SELECT COUNT(*) FROM download_log").await?,
            downloaded_bytes: self
                .count("SELECT COALESCE(SUM(total_bytes), 0) FROM download_log")
                .await?,
            ..JobStats::default()
        };

        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM failed_jobs GROUP BY status",
                params![],
            )
            .await
            .map_err(db_err)?;

        while let Some(row) = rows.next().await.map_err(db_err)? {
            let status: String = row.get(0).map_err(db_err)?;
            let count = row.get::<i64>(1).map_err(db_err)? as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "succeeded" => stats.succeeded = count,
                "abandoned" => stats.abandoned = count,
                other => tracing::warn!(status = other, "unexpected failure status"),
            }
        }

        Ok(stats)
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            None => Ok(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> ReelDigestError {
    ReelDigestError::Storage(e.to_string())
}

/// Fixed-width UTC timestamps so TEXT comparison matches time order.
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReelDigestError::Storage(format!("invalid date {s:?}: {e}")))
}

pub(crate) fn get_time(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row.get(idx).map_err(db_err)?;
    parse_db_time(&s)
}

pub(crate) fn get_parsed<T>(row: &libsql::Row, idx: i32) -> Result<T>
where
    T: FromStr<Err = ReelDigestError>,
{
    let s: String = row.get(idx).map_err(db_err)?;
    s.parse::<T>()
        .map_err(|e| ReelDigestError::Storage(format!("column {idx}: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Storage;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("rd_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }
}
