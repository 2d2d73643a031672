//! HTTP request handlers for the upload API.
//!
//! # Endpoints
//!
//! - `POST /upload/init` - Open an upload session
//! - `POST /upload/chunk` - Store one chunk (multipart)
//! - `POST /upload/complete` - Assemble, tile and register an upload
//! - `GET /images/uploaded` - List registered images
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::IngestError;
use crate::ingest::{CompleteRequest, IngestService, PipelineFailure};
use crate::registry::{ImageRecord, ImageRegistry};
use crate::upload::Stage;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the ingest service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<R: ImageRegistry> {
    pub ingest: Arc<IngestService<R>>,
}

impl<R: ImageRegistry> AppState<R> {
    pub fn new(ingest: Arc<IngestService<R>>) -> Self {
        Self { ingest }
    }
}

impl<R: ImageRegistry> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            ingest: Arc::clone(&self.ingest),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,

    /// Human-readable error message
    pub error: String,

    /// Error type identifier (e.g., "unsupported_format", "missing_chunk")
    pub kind: String,

    /// Pipeline stage that failed, for completion requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// HTTP status code (included for convenience)
    pub status: u16,
}

impl ErrorResponse {
    pub fn with_status(
        kind: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            success: false,
            error: message.into(),
            kind: kind.into(),
            stage: None,
            status: status.as_u16(),
        }
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage.as_str().to_string());
        self
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response of `POST /upload/init`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub upload_id: String,
}

/// Response of `POST /upload/chunk`.
#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub success: bool,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Status code and error type identifier for an ingest error.
fn classify(err: &IngestError) -> (StatusCode, &'static str) {
    match err {
        // 400 Bad Request
        IngestError::UnsupportedFormat { .. } => (StatusCode::BAD_REQUEST, "unsupported_format"),
        IngestError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),

        // 404 / 409 - session lifecycle
        IngestError::UnknownSession { .. } => (StatusCode::NOT_FOUND, "unknown_session"),
        IngestError::SessionConflict { .. } => (StatusCode::CONFLICT, "session_conflict"),

        // 500 Internal Server Error
        IngestError::MissingChunk { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "missing_chunk"),
        IngestError::Tiling(_) => (StatusCode::INTERNAL_SERVER_ERROR, "tiling_error"),
        IngestError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
        IngestError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        IngestError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

/// Log an error response based on its severity:
/// - 5xx at ERROR
/// - 404 at DEBUG (common and expected)
/// - other 4xx at WARN
fn log_error(status: StatusCode, kind: &str, stage: Option<Stage>, message: &str) {
    let stage = stage.map(|s| s.as_str()).unwrap_or("-");
    if status.is_server_error() {
        error!(error_type = kind, status = status.as_u16(), stage, "Server error: {}", message);
    } else if status == StatusCode::NOT_FOUND {
        debug!(error_type = kind, status = status.as_u16(), stage, "Not found: {}", message);
    } else if status.is_client_error() {
        warn!(error_type = kind, status = status.as_u16(), stage, "Client error: {}", message);
    }
}

fn error_response(err: &IngestError, stage: Option<Stage>) -> Response {
    let (status, kind) = classify(err);
    let message = err.to_string();
    log_error(status, kind, stage, &message);

    let mut body = ErrorResponse::with_status(kind, message, status);
    if let Some(stage) = stage {
        body = body.at_stage(stage);
    }
    (status, Json(body)).into_response()
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        error_response(&self, None)
    }
}

impl IntoResponse for PipelineFailure {
    fn into_response(self) -> Response {
        error_response(&self.error, Some(self.stage))
    }
}

fn multipart_error(err: MultipartError) -> IngestError {
    IngestError::invalid(format!("malformed multipart body: {}", err.body_text()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check.
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Open an upload session.
///
/// `POST /upload/init` → `{"uploadId": "<uuid>"}`
pub async fn init_handler<R>(State(state): State<AppState<R>>) -> Json<InitResponse>
where
    R: ImageRegistry + 'static,
{
    let id = state.ingest.open_session();
    Json(InitResponse {
        upload_id: id.to_string(),
    })
}

/// Store one chunk of an upload.
///
/// `POST /upload/chunk` with multipart fields `uploadId`, `chunkIndex` and
/// `chunk` (binary). Fields may arrive in any order; unknown fields are
/// ignored.
pub async fn chunk_handler<R>(
    State(state): State<AppState<R>>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>, IngestError>
where
    R: ImageRegistry + 'static,
{
    let mut upload_id: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut chunk: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("uploadId") => upload_id = Some(field.text().await.map_err(multipart_error)?),
            Some("chunkIndex") => chunk_index = Some(field.text().await.map_err(multipart_error)?),
            Some("chunk") => chunk = Some(field.bytes().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let upload_id = upload_id.ok_or_else(|| IngestError::invalid("missing field uploadId"))?;
    let chunk_index = chunk_index
        .ok_or_else(|| IngestError::invalid("missing field chunkIndex"))?
        .trim()
        .parse::<u32>()
        .map_err(|_| IngestError::invalid("chunkIndex must be a non-negative integer"))?;
    let chunk = chunk.ok_or_else(|| IngestError::invalid("missing field chunk"))?;

    state
        .ingest
        .receive_chunk(&upload_id, chunk_index, chunk)
        .await?;

    Ok(Json(ChunkResponse { success: true }))
}

/// Assemble, tile and register an upload.
///
/// `POST /upload/complete` with JSON `{uploadId, totalChunks, filename}` →
/// `{"success": true, "dziPath": "...", "dziBaseName": "..."}`.
pub async fn complete_handler<R>(
    State(state): State<AppState<R>>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> Response
where
    R: ImageRegistry + 'static,
{
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return IngestError::invalid(rejection.body_text()).into_response(),
    };

    match state.ingest.complete(request).await {
        Ok(done) => Json(done).into_response(),
        Err(failure) => failure.into_response(),
    }
}

/// List every registered image.
///
/// `GET /images/uploaded`
pub async fn images_handler<R>(State(state): State<AppState<R>>) -> Json<Vec<ImageRecord>>
where
    R: ImageRegistry + 'static,
{
    Json(state.ingest.list_images().await)
}

// =============================================================================
// Tests
// =============================================================================
