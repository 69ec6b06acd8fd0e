/// HTTP surface: download, retrieval, listing, status and cleanup routes.
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;

use crate::coordinator::DownloadCoordinator;
use crate::error::DownloadError;
use crate::models::{DownloadListing, DownloadPayload, DownloadRequest};
use crate::responder::{channel_response, StreamingResponder};
use crate::store::StoreLookupError;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DownloadCoordinator>,
    pub retention: Duration,
}

/// Error rendered as `{error, details?}` with a non-2xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    fn internal(message: impl Into<String>, details: impl ToString) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: Some(details.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/download", post(start_download))
        .route("/api/status", get(status))
        .route("/api/downloads", get(list_downloads))
        .route("/api/cleanup", delete(cleanup))
        .route("/downloads/{filename}", get(serve_download))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Validate, then answer 200 immediately and stream progress frames.
/// Everything after validation is reported inside the body.
async fn start_download(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let payload: DownloadPayload = if body.is_empty() {
        DownloadPayload::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            warn!("Unreadable download body: {}", e);
            DownloadPayload::default()
        })
    };

    let request = DownloadRequest::from_payload(&payload).map_err(|e| match e {
        DownloadError::InvalidRequest(message) => ApiError::bad_request(message),
        other => ApiError::internal("Internal server error", other),
    })?;

    info!(
        "Starting download of {}, resolution: {}",
        request.video_id(),
        request.resolution().label()
    );

    let events = state.coordinator.start(request);
    let (sink, response) = channel_response();
    tokio::spawn(StreamingResponder::new(sink).pump(events));

    Ok(response)
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> ApiResult<Response> {
    let path = state
        .coordinator
        .store()
        .resolve_file(&filename)
        .map_err(|e| match e {
            StoreLookupError::InvalidName => ApiError::bad_request("Invalid file name"),
            StoreLookupError::NotFound => ApiError::not_found("File not found"),
        })?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal("Failed to read file", e))?
        .len();

    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', "_"));
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| ApiError::bad_request("Invalid file name"))?,
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "ytdlp": state.coordinator.ytdlp_path(),
        "downloadsDir": state.coordinator.store().dir().display().to_string(),
    }))
}

async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let entries = state.coordinator.store().list().map_err(|e| {
        error!("Failed to list downloads: {}", e);
        ApiError::internal("Failed to list downloads", e)
    })?;

    let downloads: Vec<DownloadListing> = entries.iter().map(DownloadListing::from).collect();
    Ok(Json(json!({ "downloads": downloads })))
}

async fn cleanup(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let report = state
        .coordinator
        .store()
        .purge_older_than(state.retention)
        .map_err(|e| {
            error!("Cleanup failed: {}", e);
            ApiError::internal("Cleanup failed", e)
        })?;

    info!(
        "Cleanup removed {} file(s), {} failed",
        report.removed.len(),
        report.failed.len()
    );
    Ok(Json(json!({
        "message": "Cleanup completed",
        "removed": report.removed.len(),
        "failed": report.failed.len(),
    })))
}
