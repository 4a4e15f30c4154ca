//! Export HTTP routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::state::ServerState;
use super::upload_routes::ErrorResponse;
use crate::export::ExportEngine;

#[derive(Debug, Serialize)]
pub struct ExportStartedResponse {
    pub export_id: String,
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ExportStatusQuery {
    pub export_id: Option<String>,
}

/// POST /export_all
async fn export_all(State(engine): State<ExportEngine>) -> impl IntoResponse {
    let export_id = engine.start_export_all();
    info!("Export {} requested", export_id);
    Json(ExportStartedResponse {
        export_id,
        status: "queued",
        message: "Export started",
    })
}

/// GET /status?export_id=
async fn get_export_status(
    State(engine): State<ExportEngine>,
    Query(query): Query<ExportStatusQuery>,
) -> impl IntoResponse {
    let Some(export_id) = query.export_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("Missing export_id parameter"),
        )
            .into_response();
    };

    match engine.status(&export_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Export job not found"),
        )
            .into_response(),
    }
}

/// GET /list
async fn list_exports(State(engine): State<ExportEngine>) -> impl IntoResponse {
    Json(engine.list())
}

pub fn make_export_routes(state: ServerState) -> Router {
    Router::new()
        .route("/export_all", post(export_all))
        .route("/status", get(get_export_status))
        .route("/list", get(list_exports))
        .with_state(state)
}
