//! Data models for upload jobs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Lifecycle of an upload job: `queued -> extracting -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadJobStatus {
    Queued,
    Extracting,
    Completed,
    Failed,
}

impl UploadJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadJobStatus::Queued => "queued",
            UploadJobStatus::Extracting => "extracting",
            UploadJobStatus::Completed => "completed",
            UploadJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadJobStatus::Completed | UploadJobStatus::Failed)
    }
}

/// An uploaded archive waiting for, or going through, extraction.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub upload_id: String,
    pub zip_path: PathBuf,
    /// Fallback target; replaced by the resolved bundle directory once the
    /// archive has been inspected.
    pub extract_path: PathBuf,
    pub status: UploadJobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub device_id: String,
    /// Business task id supplied with the upload.
    pub original_task_id: String,
}

impl UploadJob {
    pub fn new(
        upload_id: impl Into<String>,
        zip_path: PathBuf,
        extract_path: PathBuf,
        device_id: impl Into<String>,
        original_task_id: impl Into<String>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            zip_path,
            extract_path,
            status: UploadJobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            error_message: String::new(),
            device_id: device_id.into(),
            original_task_id: original_task_id.into(),
        }
    }

    /// Name of the fallback folder under the upload root.
    pub fn folder_name(&self) -> String {
        self.extract_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.upload_id.clone())
    }

    pub fn snapshot(&self) -> UploadJobSnapshot {
        UploadJobSnapshot {
            upload_id: self.upload_id.clone(),
            status: self.status,
            created_at: self.created_at.to_rfc3339(),
            completed_at: self.completed_at.map(|t| t.to_rfc3339()),
            error_message: self.error_message.clone(),
            extract_path: (self.status == UploadJobStatus::Completed)
                .then(|| self.extract_path.to_string_lossy().into_owned()),
        }
    }

    pub fn summary(&self) -> UploadSummary {
        UploadSummary {
            upload_id: self.upload_id.clone(),
            status: self.status,
            created_at: self.created_at.to_rfc3339(),
            completed_at: self.completed_at.map(|t| t.to_rfc3339()),
            device_id: self.device_id.clone(),
            original_task_id: self.original_task_id.clone(),
        }
    }
}

/// Status view of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadJobSnapshot {
    pub upload_id: String,
    pub status: UploadJobStatus,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error_message: String,
    /// Only present once extraction completed.
    pub extract_path: Option<String>,
}

/// List view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub upload_id: String,
    pub status: UploadJobStatus,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub device_id: String,
    pub original_task_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadList {
    pub uploads: Vec<UploadSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolInfo {
    pub active_extractions: usize,
    pub running_extractions: usize,
    pub queue_length: usize,
    pub max_concurrent_extractions: usize,
    pub upload_dir: String,
}

/// Returned to the device after an accepted upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub upload_id: String,
    pub status: &'static str,
    pub message: String,
    pub file_size: u64,
}
