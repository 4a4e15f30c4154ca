//! Bounded-concurrency extraction of uploaded archives.
//!
//! A single dispatcher task pops queued jobs in FIFO order while fewer than
//! `max_concurrent_extractions` extractions are running. Each extraction
//! unpacks its archive on the blocking pool, hands the bundle to the
//! reconciler and deletes the archive. The running count is released by a
//! guard owned by the blocking work, so a timed-out extraction keeps its slot
//! until the work really stops.

use super::file_handler::{FileHandler, FileHandlerError};
use super::models::{UploadJob, UploadJobSnapshot, UploadJobStatus, UploadList, WorkerPoolInfo};
use super::reconciler::{BundleReconciler, ReconcileOutcome};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub max_concurrent_extractions: usize,
    pub poll_interval: Duration,
    pub extraction_timeout: Duration,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 2,
            poll_interval: Duration::from_millis(500),
            extraction_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, UploadJob>,
    pending: VecDeque<String>,
}

struct PoolInner {
    registry: Mutex<Registry>,
    running: AtomicUsize,
    wake: Notify,
    file_handler: Arc<FileHandler>,
    reconciler: Arc<dyn BundleReconciler>,
    settings: ExtractionSettings,
}

/// Holds one unit of the running count; releasing it wakes the dispatcher.
struct SlotGuard {
    inner: Arc<PoolInner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }
}

/// Handle to the extraction service. Cheap to clone.
#[derive(Clone)]
pub struct ExtractionWorkerPool {
    inner: Arc<PoolInner>,
}

impl ExtractionWorkerPool {
    /// Creates the pool and starts its dispatcher. Must be called from within
    /// a tokio runtime. The dispatcher stops when `shutdown` is cancelled;
    /// extractions already running are left to finish.
    pub fn start(
        file_handler: Arc<FileHandler>,
        reconciler: Arc<dyn BundleReconciler>,
        settings: ExtractionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            registry: Mutex::new(Registry::default()),
            running: AtomicUsize::new(0),
            wake: Notify::new(),
            file_handler,
            reconciler,
            settings,
        });
        tokio::spawn(run_dispatcher(inner.clone(), shutdown));
        Self { inner }
    }

    /// Registers a job and queues it for extraction. Never blocks on the
    /// dispatcher.
    pub fn enqueue(&self, job: UploadJob) {
        debug!("Queueing upload {} ({:?})", job.upload_id, job.zip_path);
        {
            let mut registry = self.inner.registry();
            registry.pending.push_back(job.upload_id.clone());
            registry.jobs.insert(job.upload_id.clone(), job);
        }
        self.inner.wake.notify_one();
    }

    /// Current state of a job, `None` for unknown ids.
    pub fn status(&self, upload_id: &str) -> Option<UploadJobSnapshot> {
        self.inner
            .registry()
            .jobs
            .get(upload_id)
            .map(UploadJob::snapshot)
    }

    /// Jobs newest first, paginated. Failed jobs are listed like any other.
    pub fn list(&self, limit: usize, offset: usize) -> UploadList {
        let registry = self.inner.registry();
        let mut jobs: Vec<&UploadJob> = registry.jobs.values().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        UploadList {
            uploads: jobs
                .iter()
                .skip(offset)
                .take(limit)
                .map(|job| job.summary())
                .collect(),
            total: jobs.len(),
            limit,
            offset,
        }
    }

    /// Drops terminal jobs that completed at least `older_than` ago and
    /// returns how many were removed. Running and queued jobs are kept.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let now = Utc::now();

        let mut registry = self.inner.registry();
        let before = registry.jobs.len();
        registry.jobs.retain(|_, job| {
            let expired = job.status.is_terminal()
                && job
                    .completed_at
                    .and_then(|completed| (now - completed).to_std().ok())
                    .map(|age| age >= older_than)
                    .unwrap_or(false);
            !expired
        });
        let removed = before - registry.jobs.len();
        if removed > 0 {
            info!("Removed {} finished upload job(s) from the registry", removed);
        }
        removed
    }

    pub fn info(&self) -> WorkerPoolInfo {
        let registry = self.inner.registry();
        WorkerPoolInfo {
            active_extractions: registry.jobs.len(),
            running_extractions: self.running_extractions(),
            queue_length: registry.pending.len(),
            max_concurrent_extractions: self.inner.settings.max_concurrent_extractions,
            upload_dir: self
                .inner
                .file_handler
                .upload_dir()
                .to_string_lossy()
                .into_owned(),
        }
    }

    pub fn running_extractions(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn file_handler(&self) -> &Arc<FileHandler> {
        &self.inner.file_handler
    }
}

impl PoolInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_job(&self, upload_id: &str, update: impl FnOnce(&mut UploadJob)) {
        if let Some(job) = self.registry().jobs.get_mut(upload_id) {
            update(job);
        }
    }

    /// Moves a job to a terminal state unless it already reached one.
    fn finish_job(&self, upload_id: &str, result: Result<(), String>) {
        self.update_job(upload_id, |job| {
            if job.status.is_terminal() {
                return;
            }
            match result {
                Ok(()) => job.status = UploadJobStatus::Completed,
                Err(message) => {
                    job.status = UploadJobStatus::Failed;
                    job.error_message = message;
                }
            }
            job.completed_at = Some(Utc::now());
        });
    }

    /// Starts extractions while there is capacity and queued work.
    fn dispatch_ready(self: &Arc<Self>) {
        while self.running.load(Ordering::SeqCst) < self.settings.max_concurrent_extractions {
            let next = {
                let mut registry = self.registry();
                let id = registry.pending.pop_front();
                let job = id.and_then(|id| registry.jobs.get_mut(&id));
                job.map(|job| {
                    job.status = UploadJobStatus::Extracting;
                    job.clone()
                })
            };
            let Some(job) = next else {
                break;
            };

            self.running.fetch_add(1, Ordering::SeqCst);
            let guard = SlotGuard {
                inner: self.clone(),
            };
            tokio::spawn(run_extraction(self.clone(), job, guard));
        }
    }

    /// Unpacks and reconciles one archive. Runs on the blocking pool.
    fn extract_blocking(&self, job: &UploadJob) -> Result<PathBuf, FileHandlerError> {
        let unpacked = self.unpack(job);

        match &unpacked {
            Ok(bundle_root) => {
                match self.reconciler.reconcile(bundle_root) {
                    Ok(ReconcileOutcome::Linked { created, .. }) => {
                        debug!("Upload {} linked {:?}", job.upload_id, created)
                    }
                    Ok(other) => debug!("Upload {} not linked: {:?}", job.upload_id, other),
                    Err(e) => error!(
                        "Reconciliation failed for upload {} ({:?}): {}",
                        job.upload_id, bundle_root, e
                    ),
                }
                match FileHandler::remove_archive(&job.zip_path) {
                    Ok(()) => debug!("Deleted archive {:?}", job.zip_path),
                    Err(e) => warn!("Failed to delete archive {:?}: {}", job.zip_path, e),
                }
            }
            Err(_) => {
                if job.zip_path.exists() {
                    if let Err(e) = FileHandler::remove_archive(&job.zip_path) {
                        warn!(
                            "Failed to clean up archive {:?} of failed upload: {}",
                            job.zip_path, e
                        );
                    }
                }
            }
        }
        unpacked
    }

    fn unpack(&self, job: &UploadJob) -> Result<PathBuf, FileHandlerError> {
        let plan = self
            .file_handler
            .plan_extraction(&job.zip_path, &job.folder_name())?;
        self.update_job(&job.upload_id, |j| j.extract_path = plan.target_dir.clone());

        let files = self.file_handler.unpack(&job.zip_path, &plan)?;
        info!(
            "Unpacked {} file(s) from upload {} into {:?}",
            files, job.upload_id, plan.target_dir
        );
        Ok(plan.target_dir)
    }
}

async fn run_dispatcher(inner: Arc<PoolInner>, shutdown: CancellationToken) {
    info!(
        "Extraction dispatcher starting (max_concurrent={}, poll_interval={}ms)",
        inner.settings.max_concurrent_extractions,
        inner.settings.poll_interval.as_millis()
    );

    loop {
        inner.dispatch_ready();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Extraction dispatcher shutting down");
                break;
            }
            _ = tokio::time::sleep(inner.settings.poll_interval) => {}
            _ = inner.wake.notified() => {}
        }
    }
}

async fn run_extraction(inner: Arc<PoolInner>, job: UploadJob, guard: SlotGuard) {
    let upload_id = job.upload_id.clone();
    let zip_path = job.zip_path.clone();
    let timeout = inner.settings.extraction_timeout;
    info!("Starting extraction of upload {}", upload_id);

    let worker = inner.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _slot = guard;
        worker.extract_blocking(&job)
    });

    let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(bundle_root))) => {
            info!("Upload {} extracted to {:?}", upload_id, bundle_root);
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            error!("Extraction of upload {} failed: {}", upload_id, e);
            Err(e.to_string())
        }
        Ok(Err(join_error)) => {
            error!("Extraction of upload {} panicked: {}", upload_id, join_error);
            remove_leftover_archive(&zip_path);
            Err(format!("Extraction task aborted: {}", join_error))
        }
        Err(_) => {
            error!(
                "Extraction of upload {} timed out after {}s",
                upload_id,
                timeout.as_secs()
            );
            Err(format!(
                "Extraction timed out after {} seconds",
                timeout.as_secs()
            ))
        }
    };
    inner.finish_job(&upload_id, result);
}

fn remove_leftover_archive(zip_path: &Path) {
    if zip_path.exists() {
        if let Err(e) = FileHandler::remove_archive(zip_path) {
            warn!("Failed to clean up archive {:?}: {}", zip_path, e);
        }
    }
}
