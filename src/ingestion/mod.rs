//! Ingestion of uploaded recording bundles.
//!
//! Flow: upload intake stores the archive and queues an [`UploadJob`], the
//! [`ExtractionWorkerPool`] unpacks it under the upload root, and the
//! [`Reconciler`] links the unpacked files to their task record.

mod file_handler;
mod intake;
mod models;
pub mod naming;
mod reconciler;
mod worker_pool;

pub use file_handler::{recover_folder_name, ExtractionPlan, FileHandler, FileHandlerError};
pub use intake::{generate_upload_id, IngestionError, UploadIntake, UploadRequest, UploadedFile};
pub use models::{
    UploadJob, UploadJobSnapshot, UploadJobStatus, UploadList, UploadReceipt, UploadSummary,
    WorkerPoolInfo,
};
pub use reconciler::{
    BundleReconciler, ReconcileError, ReconcileOutcome, Reconciler, SkipReason, IMU_DIR,
    KINEMATIC_DIR, PARAMETERS_DIR, SKELETON_DIR, TACTILE_DIR, VIDEO_DIR,
};
pub use worker_pool::{ExtractionSettings, ExtractionWorkerPool};
