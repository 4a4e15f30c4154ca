//! Accepts uploaded archives from collection devices and queues them.

use super::file_handler::{recover_folder_name, FileHandler, FileHandlerError};
use super::models::{UploadJob, UploadReceipt};
use super::worker_pool::ExtractionWorkerPool;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Missing auth token")]
    Unauthorized,

    #[error("No file uploaded")]
    MissingFile,

    #[error(transparent)]
    FileHandler(#[from] FileHandlerError),
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Name the device gave the archive.
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file: Option<UploadedFile>,
    /// Business task id the recording belongs to.
    pub task_id: String,
    pub device_id: String,
    pub auth_token: Option<String>,
}

/// Generates `upload_<unix seconds>_<8 hex chars>`.
pub fn generate_upload_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("upload_{}_{}", Utc::now().timestamp(), &random[..8])
}

pub struct UploadIntake {
    file_handler: Arc<FileHandler>,
    pool: ExtractionWorkerPool,
}

impl UploadIntake {
    pub fn new(pool: ExtractionWorkerPool) -> Self {
        Self {
            file_handler: pool.file_handler().clone(),
            pool,
        }
    }

    pub fn pool(&self) -> &ExtractionWorkerPool {
        &self.pool
    }

    /// Stores the archive as `<upload_dir>/<upload_id>.zip` and queues it for
    /// extraction. Returns as soon as the job is queued.
    pub async fn accept(&self, request: UploadRequest) -> Result<UploadReceipt, IngestionError> {
        let file = request.file.ok_or(IngestionError::MissingFile)?;
        let token_present = request
            .auth_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false);
        if !token_present {
            return Err(IngestionError::Unauthorized);
        }

        let upload_id = generate_upload_id();
        let zip_path = self.file_handler.save_upload(&upload_id, &file.data).await?;
        let file_size = file.data.len() as u64;
        info!(
            "Received upload {} from device {:?} ({:#}) as {:?}",
            upload_id,
            request.device_id,
            byte_unit::Byte::from(file_size),
            zip_path
        );

        let folder_name = recover_folder_name(&file.filename).unwrap_or_else(|| upload_id.clone());
        let extract_path = self.file_handler.upload_dir().join(folder_name);

        self.pool.enqueue(UploadJob::new(
            upload_id.clone(),
            zip_path,
            extract_path,
            request.device_id,
            request.task_id,
        ));

        Ok(UploadReceipt {
            upload_id,
            status: "uploaded",
            message: "File uploaded, extraction queued".to_string(),
            file_size,
        })
    }
}
