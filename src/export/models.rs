use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// `queued -> preparing -> processing -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportJobStatus {
    Queued,
    Preparing,
    Processing,
    Completed,
    Failed,
}

impl ExportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportJobStatus::Queued => "queued",
            ExportJobStatus::Preparing => "preparing",
            ExportJobStatus::Processing => "processing",
            ExportJobStatus::Completed => "completed",
            ExportJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportJobStatus::Completed | ExportJobStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub export_id: String,
    pub status: ExportJobStatus,
    /// 0..=100
    pub progress: u8,
    pub message: String,
    pub export_path: Option<PathBuf>,
    pub file_count: usize,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    pub fn new(export_id: impl Into<String>) -> Self {
        Self {
            export_id: export_id.into(),
            status: ExportJobStatus::Queued,
            progress: 0,
            message: "Export queued".to_string(),
            export_path: None,
            file_count: 0,
            error_message: String::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> ExportJobSnapshot {
        ExportJobSnapshot {
            export_id: self.export_id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            export_path: self
                .export_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            file_count: self.file_count,
            error_message: self.error_message.clone(),
            created_at: self.created_at.to_rfc3339(),
            completed_at: self.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportJobSnapshot {
    pub export_id: String,
    pub status: ExportJobStatus,
    pub progress: u8,
    pub message: String,
    pub export_path: Option<String>,
    pub file_count: usize,
    pub error_message: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportList {
    pub exports: Vec<ExportJobSnapshot>,
    pub total: usize,
}
