//! HTTP boundary: submissions, health and stats.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use reeldigest_core::{Admission, DigestService};
use reeldigest_shared::{ChatId, JobStats, ReelDigestError, TelegramConfig};
use reeldigest_storage::Storage;

/// State shared across handlers.
#[derive(Clone)]
pub(crate) struct ApiState {
    pub service: Arc<DigestService>,
    pub storage: Arc<Storage>,
    pub telegram: TelegramConfig,
    pub retry_interval_secs: u64,
    pub max_retries: u32,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct SubmissionRequest {
    pub url: String,
    pub chat_id: ChatId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum SubmissionResponse {
    Accepted {
        job_id: String,
        url: String,
    },
    Duplicate {
        url: String,
        processed_at: String,
        artifact_path: PathBuf,
    },
    InProgress {
        url: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StatsResponse {
    #[serde(flatten)]
    pub counts: JobStats,
    pub retry_interval_secs: u64,
    pub max_retries: u32,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub(crate) fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/api/v1/submissions", post(submit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn stats(State(state): State<ApiState>) -> Response {
    match state.storage.stats().await {
        Ok(counts) => Json(StatsResponse {
            counts,
            retry_interval_secs: state.retry_interval_secs,
            max_retries: state.max_retries,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "stats query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable")
        }
    }
}

/// Admit a submission; an accepted job runs on its own task.
async fn submit(State(state): State<ApiState>, Json(req): Json<SubmissionRequest>) -> Response {
    if !state.telegram.is_chat_allowed(req.chat_id) {
        info!(chat_id = req.chat_id, "submission from chat not on the allow list");
        return error_response(StatusCode::FORBIDDEN, "chat is not allowed to submit");
    }

    match state.service.submit(&req.url, req.chat_id).await {
        Ok(Admission::Accepted(job)) => {
            let body = SubmissionResponse::Accepted {
                job_id: job.id.to_string(),
                url: job.url.fetch_url(),
            };
            state.service.spawn(job);
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Ok(Admission::AlreadyProcessed(record)) => {
            let body = SubmissionResponse::Duplicate {
                url: record.url,
                processed_at: record.processed_at.to_rfc3339(),
                artifact_path: record.artifact_path,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Admission::InProgress(url)) => {
            let body = SubmissionResponse::InProgress { url: url.key };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        Err(err @ ReelDigestError::Validation { .. }) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(e) => {
            error!(error = %e, "submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "submission failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reeldigest_shared::{AppConfig, ContentType, JobId, ProcessedUrl};
    use uuid::Uuid;

    use super::*;
    use crate::wiring;

    struct TestServer {
        base: String,
        storage: Arc<Storage>,
        _dir: tempfile::TempDir,
    }

    async fn start(allowed: Vec<ChatId>) -> TestServer {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.storage.database_path = dir
            .path()
            .join(format!("rd_http_{}.db", Uuid::now_v7()))
            .to_string_lossy()
            .into_owned();
        config.storage.artifact_dir = dir.path().join("notes").to_string_lossy().into_owned();
        config.storage.temp_dir = dir.path().join("tmp").to_string_lossy().into_owned();
        config.acquisition.command = "/nonexistent/yt-dlp".into();
        config.telegram.allowed_chat_ids = allowed;

        let app = wiring::build(config, Arc::new(reeldigest_core::LogNotifier), None)
            .await
            .expect("build app");
        let state = ApiState {
            service: app.service.clone(),
            storage: app.storage.clone(),
            telegram: app.config.telegram.clone(),
            retry_interval_secs: app.config.retry.interval_secs,
            max_retries: app.config.retry.max_retries,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.ok();
        });

        TestServer {
            base: format!("http://{addr}"),
            storage: app.storage,
            _dir: dir,
        }
    }

    async fn post_submission(server: &TestServer, url: &str, chat_id: ChatId) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/api/v1/submissions", server.base))
            .json(&serde_json::json!({ "url": url, "chat_id": chat_id }))
            .send()
            .await
            .expect("request")
    }

    #[tokio::test]
    async fn health_reports_version() {
        let server = start(Vec::new()).await;
        let body: HealthResponse = reqwest::get(format!("{}/health", server.base))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(body.status, "healthy");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn stats_include_retry_settings() {
        let server = start(Vec::new()).await;
        let body: StatsResponse = reqwest::get(format!("{}/stats", server.base))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(body.counts, JobStats::default());
        assert_eq!(body.retry_interval_secs, 3600);
        assert_eq!(body.max_retries, 3);
    }

    #[tokio::test]
    async fn invalid_url_is_unprocessable() {
        let server = start(Vec::new()).await;
        let resp = post_submission(&server, "https://example.com/video", 1).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ErrorResponse = resp.json().await.expect("json");
        assert!(!body.error.is_empty());
    }

    #[tokio::test]
    async fn chats_outside_allow_list_are_forbidden() {
        let server = start(vec![100]).await;
        let resp = post_submission(&server, "https://instagram.com/reel/abc", 5).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn processed_url_is_reported_as_duplicate() {
        let server = start(Vec::new()).await;
        let now = Utc::now();
        let record = ProcessedUrl {
            url: "instagram.com/reel/done".into(),
            content_type: ContentType::Reel,
            title: "Done".into(),
            chat_id: 1,
            artifact_path: PathBuf::from("/notes/done.md"),
            processed_at: now,
        };
        assert!(
            server
                .storage
                .reserve(&record.url, JobId::new(), 1, now)
                .await
                .expect("reserve")
        );
        server.storage.complete(&record).await.expect("complete");

        let resp = post_submission(&server, "https://www.instagram.com/reel/done/", 2).await;
        assert_eq!(resp.status(), StatusCode::OK);
        match resp.json::<SubmissionResponse>().await.expect("json") {
            SubmissionResponse::Duplicate { artifact_path, .. } => {
                assert_eq!(artifact_path, PathBuf::from("/notes/done.md"));
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reserved_url_is_a_conflict() {
        let server = start(Vec::new()).await;
        assert!(
            server
                .storage
                .reserve("instagram.com/reel/busy", JobId::new(), 1, Utc::now())
                .await
                .expect("reserve")
        );

        let resp = post_submission(&server, "instagram.com/reels/busy", 2).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn new_url_is_accepted_with_job_id() {
        let server = start(Vec::new()).await;
        let resp = post_submission(&server, "https://instagram.com/reel/fresh?igsh=x", 3).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        match resp.json::<SubmissionResponse>().await.expect("json") {
            SubmissionResponse::Accepted { job_id, url } => {
                assert!(job_id.parse::<JobId>().is_ok());
                assert_eq!(url, "https://instagram.com/reel/fresh");
            }
            other => panic!("expected accepted, got {other:?}"),
        }
    }
}
