//! HTTP API
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/v1/readyz` | Readiness probe |
//! | `POST` | `/api/v1/add_resource` | Register a resource and start indexing it |
//! | `POST` | `/api/v1/remove_resource` | Stop watching a resource |
//! | `POST` | `/api/v1/retrieve` | Query one resource |
//! | `POST` | `/api/v1/indexing-status` | Per-document history of a resource |
//! | `GET`  | `/api/v1/resources` | List registered resources |
//!
//! Errors are returned as
//! `{"error": {"code": "...", "message": "..."}, "detail": "..."}` where
//! `detail` repeats the message.

use crate::error::{Error, Result};
use crate::retrieve::RetrieveResponse;
use crate::service::{IndexingService, IndexingStatusReport, ResourceList};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct AddResourceRequest {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct ResourceUriRequest {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    pub base_uri: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: String,
    message: String,
}

impl StatusMessage {
    fn success(message: String) -> Self {
        Self {
            status: "success".to_string(),
            message,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    detail: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error that converts into an HTTP response
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest(message) => AppError::bad_request(message),
            Error::DuplicateResource(message) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "duplicate_resource",
                message,
            },
            Error::NotFound(message) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            other => {
                error!("Request failed: {}", other);
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: other.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.message.clone(),
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, AppError>;

/// Build the API router over a service
pub fn router(service: Arc<IndexingService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/readyz", get(handle_readyz))
        .route("/add_resource", post(handle_add_resource))
        .route("/remove_resource", post(handle_remove_resource))
        .route("/retrieve", post(handle_retrieve))
        .route("/indexing-status", post(handle_indexing_status))
        .route("/resources", get(handle_resources));

    Router::new()
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(service)
}

/// Serve the API on `bind` until Ctrl-C, then shut the service down
pub async fn run(service: Arc<IndexingService>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn handle_readyz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_add_resource(
    State(service): State<Arc<IndexingService>>,
    Json(request): Json<AddResourceRequest>,
) -> ApiResult<StatusMessage> {
    let message = service.add_resource(&request.name, &request.uri).await?;
    Ok(Json(StatusMessage::success(message)))
}

async fn handle_remove_resource(
    State(service): State<Arc<IndexingService>>,
    Json(request): Json<ResourceUriRequest>,
) -> ApiResult<StatusMessage> {
    let message = service.remove_resource(&request.uri).await?;
    Ok(Json(StatusMessage::success(message)))
}

async fn handle_retrieve(
    State(service): State<Arc<IndexingService>>,
    Json(request): Json<RetrieveRequest>,
) -> ApiResult<RetrieveResponse> {
    let max_top_k = service.config().retrieval.max_top_k;
    if let Some(top_k) = request.top_k {
        if top_k == 0 || top_k > max_top_k {
            return Err(AppError::bad_request(format!(
                "top_k must be between 1 and {}",
                max_top_k
            )));
        }
    }

    let response = service
        .retrieve(&request.query, &request.base_uri, request.top_k)
        .await?;
    Ok(Json(response))
}

async fn handle_indexing_status(
    State(service): State<Arc<IndexingService>>,
    Json(request): Json<ResourceUriRequest>,
) -> ApiResult<IndexingStatusReport> {
    Ok(Json(service.indexing_status(&request.uri).await?))
}

async fn handle_resources(State(service): State<Arc<IndexingService>>) -> ApiResult<ResourceList> {
    Ok(Json(service.list_resources().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::corpus::test_support::local_corpus;
    use crate::leader::LeadershipGate;
    use crate::meta::test_support::setup_test_db;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct NeverLeader;

    impl LeadershipGate for NeverLeader {
        fn try_acquire(&self) -> Result<bool> {
            Ok(false)
        }

        fn is_leader(&self) -> bool {
            false
        }
    }

    async fn app() -> (Router, TempDir) {
        let (db, tmp) = setup_test_db().await;
        let service = IndexingService::from_parts(
            Config::default(),
            db,
            local_corpus(),
            None,
            Box::new(NeverLeader),
        )
        .unwrap();
        (router(service), tmp)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_readyz() {
        let (app, _tmp) = app().await;
        let (status, body) = send(&app, "GET", "/api/v1/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_remove_unknown_resource_is_404() {
        let (app, _tmp) = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/remove_resource",
            Some(serde_json::json!({ "uri": "file:///nowhere" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["detail"], "Resource not being watched");
    }

    #[tokio::test]
    async fn test_duplicate_name_is_400() {
        let (app, _tmp) = app().await;
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        for dir in [&first, &second] {
            std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        }

        let add = |dir: &TempDir| {
            serde_json::json!({
                "name": "a",
                "uri": crate::uri::path_to_uri(&dir.path().canonicalize().unwrap()),
            })
        };

        let (status, body) = send(&app, "POST", "/api/v1/add_resource", Some(add(&first))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (status, body) = send(&app, "POST", "/api/v1/add_resource", Some(add(&second))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "duplicate_resource");

        let (status, body) = send(&app, "GET", "/api/v1/resources", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["status_summary"]["active"], 1);
    }

    #[tokio::test]
    async fn test_retrieve_validates_top_k() {
        let (app, _tmp) = app().await;
        for top_k in [0, 21] {
            let (status, body) = send(
                &app,
                "POST",
                "/api/v1/retrieve",
                Some(serde_json::json!({
                    "query": "q",
                    "base_uri": "https://example.com",
                    "top_k": top_k,
                })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["code"], "bad_request");
        }
    }

    #[tokio::test]
    async fn test_retrieve_with_nothing_in_scope_is_404() {
        let (app, _tmp) = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/retrieve",
            Some(serde_json::json!({ "query": "q", "base_uri": "https://example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body["detail"],
            "No relevant documents found in uri: https://example.com"
        );
    }

    #[tokio::test]
    async fn test_indexing_status_missing_directory_is_404() {
        let (app, _tmp) = app().await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/indexing-status",
            Some(serde_json::json!({ "uri": "file:///definitely/not/here" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
