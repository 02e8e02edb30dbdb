//! SQL migration definitions for the reeldigest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: processed_urls, url_reservations, failed_jobs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Completed URLs, written once
CREATE TABLE IF NOT EXISTS processed_urls (
    url           TEXT PRIMARY KEY,
    content_type  TEXT NOT NULL,
    title         TEXT NOT NULL,
    chat_id       INTEGER NOT NULL,
    artifact_path TEXT NOT NULL,
    processed_at  TEXT NOT NULL
);

-- In-flight claims; a row exists only while a job for the URL runs
CREATE TABLE IF NOT EXISTS url_reservations (
    url         TEXT PRIMARY KEY,
    job_id      TEXT NOT NULL,
    chat_id     INTEGER NOT NULL,
    reserved_at TEXT NOT NULL
);

-- Failure queue consumed by the retry sweep
CREATE TABLE IF NOT EXISTS failed_jobs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    url           TEXT NOT NULL,
    content_type  TEXT NOT NULL,
    chat_id       INTEGER NOT NULL,
    stage         TEXT NOT NULL,
    error_detail  TEXT NOT NULL,
    retry_count   INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
    created_at    TEXT NOT NULL,
    last_retry_at TEXT,
    status        TEXT NOT NULL DEFAULT 'pending'
                  CHECK (status IN ('pending', 'succeeded', 'abandoned'))
);

-- At most one pending record per URL
CREATE UNIQUE INDEX IF NOT EXISTS idx_failed_jobs_pending_url
    ON failed_jobs(url) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_failed_jobs_status ON failed_jobs(status, created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Knowledge-base sync: daily_sync, sync_issues",
            sql: r#"
CREATE TABLE IF NOT EXISTS daily_sync (
    date           TEXT PRIMARY KEY,
    external_id    TEXT NOT NULL,
    external_title TEXT NOT NULL,
    item_count     INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

-- Sync failures kept for manual follow-up
CREATE TABLE IF NOT EXISTS sync_issues (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    url        TEXT NOT NULL,
    chat_id    INTEGER NOT NULL,
    error      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "Completing a URL drops its reservation in the same statement",
            sql: r#"
CREATE TRIGGER IF NOT EXISTS processed_urls_release_reservation
AFTER INSERT ON processed_urls
BEGIN
    DELETE FROM url_reservations WHERE url = NEW.url;
END;

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
        Migration {
            version: 4,
            description: "Per-download size log",
            sql: r#"
CREATE TABLE IF NOT EXISTS download_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    url           TEXT NOT NULL,
    content_type  TEXT NOT NULL,
    title         TEXT NOT NULL,
    video_bytes   INTEGER NOT NULL DEFAULT 0,
    audio_bytes   INTEGER NOT NULL DEFAULT 0,
    image_bytes   TEXT NOT NULL DEFAULT '[]',  -- JSON array, one entry per image
    total_bytes   INTEGER NOT NULL DEFAULT 0,
    downloaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_download_log_url ON download_log(url);

INSERT INTO schema_migrations (version) VALUES (4);
"#,
        },
    ]
}
