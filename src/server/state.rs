use axum::extract::FromRef;

use crate::export::ExportEngine;
use crate::ingestion::UploadIntake;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedUploadIntake = Arc<UploadIntake>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub intake: GuardedUploadIntake,
    pub export_engine: ExportEngine,
}

impl FromRef<ServerState> for GuardedUploadIntake {
    fn from_ref(input: &ServerState) -> Self {
        input.intake.clone()
    }
}

impl FromRef<ServerState> for ExportEngine {
    fn from_ref(input: &ServerState) -> Self {
        input.export_engine.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
