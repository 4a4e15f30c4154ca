//! Common test infrastructure
//!
//! Spins up the full ingestion + export pipeline on a scratch directory.
//! Tests should only import from this module.

#![allow(dead_code)]

mod fixtures;

pub use fixtures::*;

use axum::Router;
use data_collection_server::export::{ExportEngine, ExportJobSnapshot, ExportSettings};
use data_collection_server::ingestion::{
    ExtractionSettings, ExtractionWorkerPool, FileHandler, Reconciler, UploadIntake,
    UploadJobSnapshot,
};
use data_collection_server::metadata_store::{MetadataStore, SqliteMetadataStore};
use data_collection_server::server::{make_app, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const WAIT_STEP: Duration = Duration::from_millis(20);
pub const WAIT_ATTEMPTS: usize = 500;

pub struct TestPipeline {
    pub dir: TempDir,
    pub store: Arc<dyn MetadataStore>,
    pub intake: Arc<UploadIntake>,
    pub export_engine: ExportEngine,
    shutdown: CancellationToken,
}

impl TestPipeline {
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_with_upload_limit(u64::MAX)
    }

    pub fn spawn_with_upload_limit(max_upload_size: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let upload_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).unwrap();

        let store: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::new(dir.path().join("metadata.db")).unwrap());
        let shutdown = CancellationToken::new();

        let pool = ExtractionWorkerPool::start(
            Arc::new(FileHandler::new(&upload_dir, max_upload_size)),
            Arc::new(Reconciler::new(store.clone(), &upload_dir)),
            ExtractionSettings {
                max_concurrent_extractions: 2,
                poll_interval: WAIT_STEP,
                extraction_timeout: Duration::from_secs(30),
            },
            shutdown.clone(),
        );
        let export_engine = ExportEngine::new(
            store.clone(),
            ExportSettings {
                ingest_root: upload_dir.clone(),
                export_root: upload_dir.join("metadata_export"),
                export_timeout: Duration::from_secs(30),
            },
        );

        Self {
            dir,
            store,
            intake: Arc::new(UploadIntake::new(pool)),
            export_engine,
            shutdown,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn router(&self) -> Router {
        self.router_with_config(ServerConfig::default())
    }

    pub fn router_with_config(&self, config: ServerConfig) -> Router {
        make_app(config, self.intake.clone(), self.export_engine.clone())
    }

    pub async fn wait_for_upload(&self, upload_id: &str) -> UploadJobSnapshot {
        for _ in 0..WAIT_ATTEMPTS {
            if let Some(snapshot) = self.intake.pool().status(upload_id) {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(WAIT_STEP).await;
        }
        panic!("upload {} did not finish", upload_id);
    }

    pub async fn wait_for_export(&self, export_id: &str) -> ExportJobSnapshot {
        for _ in 0..WAIT_ATTEMPTS {
            if let Some(snapshot) = self.export_engine.status(export_id) {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(WAIT_STEP).await;
        }
        panic!("export {} did not finish", export_id);
    }
}

impl Drop for TestPipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

