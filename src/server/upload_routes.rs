//! Upload HTTP routes.
//!
//! Provides endpoints for:
//! - Uploading recording archives from collection devices
//! - Checking extraction status
//! - Listing and pruning upload jobs

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::{GuardedUploadIntake, ServerState};
use super::ServerConfig;
use crate::ingestion::{
    FileHandlerError, IngestionError, UploadRequest, UploadedFile, WorkerPoolInfo,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: error.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub older_than_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub cleaned_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfoResponse {
    pub service_name: &'static str,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub pool: WorkerPoolInfo,
}

fn ingestion_error_status(err: &IngestionError) -> StatusCode {
    match err {
        IngestionError::MissingFile => StatusCode::BAD_REQUEST,
        IngestionError::Unauthorized => StatusCode::UNAUTHORIZED,
        IngestionError::FileHandler(FileHandlerError::FileTooLarge(_, _)) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        IngestionError::FileHandler(FileHandlerError::InvalidFilename(_)) => {
            StatusCode::BAD_REQUEST
        }
        IngestionError::FileHandler(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// Routes
// =============================================================================

/// POST /upload - Upload a recording archive (multipart/form-data)
async fn upload_file(
    State(intake): State<GuardedUploadIntake>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut request = UploadRequest::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read multipart body: {}", e);
                return (e.status(), ErrorResponse::new(e.body_text())).into_response();
            }
        };
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        request.file = Some(UploadedFile {
                            filename,
                            data: bytes.to_vec(),
                        })
                    }
                    Err(e) => {
                        warn!("Failed to read file data: {}", e);
                        return (e.status(), ErrorResponse::new("Failed to read file"))
                            .into_response();
                    }
                }
            }
            "task_id" | "device_id" | "auth_token" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Failed to read field {}: {}", field_name, e);
                        return (
                            e.status(),
                            ErrorResponse::new(format!("Failed to read {}", field_name)),
                        )
                            .into_response();
                    }
                };
                match field_name.as_str() {
                    "task_id" => request.task_id = value,
                    "device_id" => request.device_id = value,
                    _ => request.auth_token = Some(value),
                }
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    match intake.accept(request).await {
        Ok(receipt) => {
            info!("Accepted upload {}", receipt.upload_id);
            Json(receipt).into_response()
        }
        Err(e) => {
            warn!("Rejected upload: {}", e);
            (ingestion_error_status(&e), ErrorResponse::new(e.to_string())).into_response()
        }
    }
}

/// GET /status?upload_id=
async fn get_status(
    State(intake): State<GuardedUploadIntake>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let Some(upload_id) = query.upload_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("Missing upload_id parameter"),
        )
            .into_response();
    };

    match intake.pool().status(&upload_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Upload job not found"),
        )
            .into_response(),
    }
}

/// GET /list_uploads?limit=&offset=
async fn list_uploads(
    State(intake): State<GuardedUploadIntake>,
    Query(query): Query<PaginationQuery>,
) -> impl IntoResponse {
    Json(intake.pool().list(query.limit, query.offset))
}

/// DELETE /cleanup?older_than_secs=
async fn cleanup(
    State(intake): State<GuardedUploadIntake>,
    State(config): State<ServerConfig>,
    Query(query): Query<CleanupQuery>,
) -> impl IntoResponse {
    let older_than = query.older_than_secs.unwrap_or(config.job_retention_secs);
    let cleaned_count = intake.pool().cleanup(Duration::from_secs(older_than));
    Json(CleanupResponse {
        message: format!("Cleaned up {} expired upload jobs", cleaned_count),
        cleaned_count,
    })
}

/// GET /info
async fn get_info(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServiceInfoResponse {
        service_name: "File Upload Service",
        uptime_secs: state.start_time.elapsed().as_secs(),
        pool: state.intake.pool().info(),
    })
}

pub fn make_upload_routes(state: ServerState) -> Router {
    // Multipart framing needs some room on top of the archive itself.
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/upload", post(upload_file))
        .route("/status", get(get_status))
        .route("/list_uploads", get(list_uploads))
        .route("/cleanup", delete(cleanup))
        .route("/info", get(get_info))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
