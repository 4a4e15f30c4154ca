use anyhow::{Context, Result};
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::export_routes::make_export_routes;
use super::state::ServerState;
use super::upload_routes::make_upload_routes;
use super::{log_requests, ServerConfig};
use crate::export::ExportEngine;
use crate::ingestion::UploadIntake;

impl ServerState {
    fn new(config: ServerConfig, intake: Arc<UploadIntake>, export_engine: ExportEngine) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            intake,
            export_engine,
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    intake: Arc<UploadIntake>,
    export_engine: ExportEngine,
) -> Router {
    let state = ServerState::new(config, intake, export_engine);

    let app: Router = Router::new()
        .nest("/api/files", make_upload_routes(state.clone()))
        .nest("/api/export", make_export_routes(state.clone()));

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serves the HTTP API until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    intake: Arc<UploadIntake>,
    export_engine: ExportEngine,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, intake, export_engine);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {:?}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
