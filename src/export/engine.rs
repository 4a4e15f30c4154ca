use super::catalog::{write_task_catalog, write_task_info};
use super::layout::{
    create_canonical_tree, export_task_dir, parse_trailing_pair, RESERVED_EXPORT_DIR,
    UNKNOWN_SEGMENT,
};
use super::models::{ExportJob, ExportJobSnapshot, ExportJobStatus, ExportList};
use crate::metadata_store::MetadataStore;
use chrono::Utc;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no task data found")]
    NoTaskData,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Metadata store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export timed out after {0} seconds")]
    TimedOut(u64),
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Directory holding one unpacked bundle per task folder.
    pub ingest_root: PathBuf,
    /// Directory receiving one `export_<timestamp>_<hex>` directory per run.
    pub export_root: PathBuf,
    pub export_timeout: Duration,
}

struct EngineInner {
    jobs: Mutex<HashMap<String, ExportJob>>,
    store: Arc<dyn MetadataStore>,
    settings: ExportSettings,
}

/// Runs "export everything" jobs in the background and tracks their progress.
#[derive(Clone)]
pub struct ExportEngine {
    inner: Arc<EngineInner>,
}

impl ExportEngine {
    pub fn new(store: Arc<dyn MetadataStore>, settings: ExportSettings) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                jobs: Mutex::new(HashMap::new()),
                store,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.inner.settings
    }

    /// Registers a queued export and starts it. Returns the export id without
    /// waiting for the export itself. Must be called from within a tokio
    /// runtime.
    pub fn start_export_all(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let export_id = format!("export_{}_{}", Utc::now().timestamp(), suffix);

        self.inner
            .jobs()
            .insert(export_id.clone(), ExportJob::new(export_id.clone()));
        info!("Queued export {}", export_id);

        tokio::spawn(run_export(self.inner.clone(), export_id.clone(), suffix));
        export_id
    }

    pub fn status(&self, export_id: &str) -> Option<ExportJobSnapshot> {
        self.inner.jobs().get(export_id).map(ExportJob::snapshot)
    }

    /// Every known export, newest first.
    pub fn list(&self) -> ExportList {
        let jobs = self.inner.jobs();
        let mut exports: Vec<&ExportJob> = jobs.values().collect();
        exports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ExportList {
            exports: exports.iter().map(|job| job.snapshot()).collect(),
            total: exports.len(),
        }
    }

    /// Drops finished exports whose completion is at least `older_than` ago.
    /// The exported directories stay on disk. Returns how many were removed.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let now = Utc::now();

        let mut jobs = self.inner.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let expired = job.status.is_terminal()
                && job
                    .completed_at
                    .and_then(|completed| (now - completed).to_std().ok())
                    .map(|age| age >= older_than)
                    .unwrap_or(false);
            !expired
        });
        let removed = before - jobs.len();
        if removed > 0 {
            info!("Removed {} finished export job(s) from the registry", removed);
        }
        removed
    }
}

impl EngineInner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<String, ExportJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `update` unless the job already reached a terminal state.
    fn update_running(&self, export_id: &str, update: impl FnOnce(&mut ExportJob)) {
        if let Some(job) = self.jobs().get_mut(export_id) {
            if !job.status.is_terminal() {
                update(job);
            }
        }
    }

    fn finish_job(&self, export_id: &str, result: Result<usize, String>) {
        self.update_running(export_id, |job| {
            match result {
                Ok(file_count) => {
                    job.status = ExportJobStatus::Completed;
                    job.progress = 100;
                    job.file_count = file_count;
                    job.message = format!("Export completed, {} files copied", file_count);
                }
                Err(message) => {
                    job.status = ExportJobStatus::Failed;
                    job.message = "Export failed".to_string();
                    job.error_message = message;
                }
            }
            job.completed_at = Some(Utc::now());
        });
    }

    /// Task folders under the ingestion root in name order. Plain files, the
    /// reserved export name and the export root itself are skipped.
    fn list_task_dirs(&self) -> Result<Vec<PathBuf>, ExportError> {
        let ingest_root = &self.settings.ingest_root;
        let entries = match fs::read_dir(ingest_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let export_root_name: Option<OsString> = self
            .settings
            .export_root
            .strip_prefix(ingest_root)
            .ok()
            .and_then(|rel| rel.components().next())
            .map(|c| c.as_os_str().to_os_string());

        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            if name == RESERVED_EXPORT_DIR || Some(name) == export_root_name.as_deref() {
                continue;
            }
            dirs.push(path);
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Runs on the blocking pool.
    fn export_blocking(&self, export_id: &str, suffix: &str) -> Result<usize, ExportError> {
        self.update_running(export_id, |job| {
            job.status = ExportJobStatus::Preparing;
            job.message = "Scanning task folders".to_string();
        });

        let dir_name = format!("export_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), suffix);
        let task_dirs = self.list_task_dirs()?;
        if task_dirs.is_empty() {
            return Err(ExportError::NoTaskData);
        }

        let export_dir = self.settings.export_root.join(dir_name);
        fs::create_dir_all(&export_dir)?;
        let total = task_dirs.len();
        self.update_running(export_id, |job| {
            job.status = ExportJobStatus::Processing;
            job.export_path = Some(export_dir.clone());
            job.message = format!("Exporting {} task folders", total);
        });

        let mut file_count = 0;
        let mut business_task_ids: Vec<String> = Vec::new();
        for (index, task_dir) in task_dirs.iter().enumerate() {
            let folder = task_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (task_id, episode_id) = parse_trailing_pair(&folder);

            create_canonical_tree(&export_dir, &task_id, &episode_id)?;
            let copied = export_task_dir(task_dir, &export_dir, &task_id, &episode_id)?;
            debug!("Export {}: {} files from {:?}", export_id, copied, task_dir);
            file_count += copied;

            if task_id != UNKNOWN_SEGMENT && !business_task_ids.contains(&task_id) {
                business_task_ids.push(task_id);
            }

            let done = index + 1;
            let progress = (100.0 * done as f64 / total as f64).round() as u8;
            self.update_running(export_id, |job| {
                job.progress = progress;
                job.file_count = file_count;
                job.message = format!("Processed {}/{} task folders", done, total);
            });
        }

        write_task_catalog(&export_dir)?;
        write_task_info(&export_dir, self.store.as_ref(), &business_task_ids)?;
        Ok(file_count)
    }
}

async fn run_export(inner: Arc<EngineInner>, export_id: String, suffix: String) {
    let timeout = inner.settings.export_timeout;
    info!("Starting export {}", export_id);

    let worker = inner.clone();
    let id = export_id.clone();
    let handle = tokio::task::spawn_blocking(move || worker.export_blocking(&id, &suffix));

    let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(file_count))) => {
            info!("Export {} completed with {} files", export_id, file_count);
            Ok(file_count)
        }
        Ok(Ok(Err(e))) => {
            error!("Export {} failed: {}", export_id, e);
            Err(e.to_string())
        }
        Ok(Err(join_error)) => {
            error!("Export {} panicked: {}", export_id, join_error);
            Err(format!("Export task panicked: {}", join_error))
        }
        Err(_) => {
            let e = ExportError::TimedOut(timeout.as_secs());
            error!("Export {}: {}", export_id, e);
            Err(e.to_string())
        }
    };
    inner.finish_job(&export_id, result);
}
