//! Metadata store: task records and the per-modality records created by the
//! reconciler.

mod models;
mod schema;
mod sqlite_store;

pub use models::*;
pub use sqlite_store::SqliteMetadataStore;

use anyhow::Result;

/// Storage contract used by the ingestion and export pipelines.
pub trait MetadataStore: Send + Sync {
    // ==================== Tasks ====================

    /// Create a task record and return it.
    fn create_task(&self, task: &NewTask) -> Result<TaskRecord>;

    fn get_task(&self, id: i64) -> Result<Option<TaskRecord>>;

    /// Look up a task by its unique episode id.
    fn get_task_by_episode(&self, episode_id: &str) -> Result<Option<TaskRecord>>;

    /// Most recently created task for a business task id.
    fn find_latest_task_by_business_id(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// All tasks sharing a business task id, oldest first.
    fn list_tasks_by_business_id(&self, task_id: &str) -> Result<Vec<TaskRecord>>;

    // ==================== Modality records ====================

    /// Insert every record present in `batch` for the given task and point
    /// the matching task links at the new rows, all in one transaction.
    /// Links for kinds absent from the batch keep their previous value.
    fn commit_reconciliation(&self, task_record_id: i64, batch: &ModalityBatch)
        -> Result<TaskLinks>;

    fn get_observations(&self, id: i64) -> Result<Option<Observations>>;

    fn get_parameters(&self, id: i64) -> Result<Option<Parameters>>;

    fn get_skeleton_data(&self, id: i64) -> Result<Option<SkeletonData>>;

    fn get_kinematic_data(&self, id: i64) -> Result<Option<KinematicData>>;

    fn get_imu_data(&self, id: i64) -> Result<Option<ImuData>>;

    fn get_tactile_feedback(&self, id: i64) -> Result<Option<TactileFeedback>>;

    /// Number of records of `kind` owned by a task.
    fn count_records(&self, kind: ModalityKind, task_record_id: i64) -> Result<usize>;
}
