//! Data models for the metadata store.

use serde::{Deserialize, Serialize};

/// Review status of a recorded task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Accepted,
    Rejected,
    Ng,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Ng => "ng",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "accepted" => Some(TaskStatus::Accepted),
            "rejected" => Some(TaskStatus::Rejected),
            "ng" => Some(TaskStatus::Ng),
            _ => None,
        }
    }
}

/// One recorded episode of a business task, with links to the latest
/// modality record of each kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    /// Business task id, shared by every episode of the same task.
    pub task_id: String,
    /// Unique per record.
    pub episode_id: String,
    pub task_name: String,
    pub init_scene_text: Option<String>,
    pub action_config: serde_json::Value,
    pub task_status: TaskStatus,
    pub links: TaskLinks,
    /// Unix milliseconds
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Back-references from a task to its modality records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLinks {
    pub observations_id: Option<i64>,
    pub parameters_id: Option<i64>,
    #[serde(rename = "skeletonData_id")]
    pub skeleton_data_id: Option<i64>,
    #[serde(rename = "kinematicData_id")]
    pub kinematic_data_id: Option<i64>,
    pub imu_id: Option<i64>,
    pub tactile_feedback_id: Option<i64>,
}

/// Input for [`MetadataStore::create_task`](super::MetadataStore::create_task).
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_id: String,
    /// When absent the record id, in decimal, becomes the episode id.
    pub episode_id: Option<String>,
    pub task_name: String,
    pub init_scene_text: Option<String>,
    pub action_config: Option<serde_json::Value>,
}

/// The six modality kinds a bundle can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModalityKind {
    Observations,
    Parameters,
    SkeletonData,
    KinematicData,
    ImuData,
    TactileFeedback,
}

impl ModalityKind {
    pub const ALL: [ModalityKind; 6] = [
        ModalityKind::Observations,
        ModalityKind::Parameters,
        ModalityKind::SkeletonData,
        ModalityKind::KinematicData,
        ModalityKind::ImuData,
        ModalityKind::TactileFeedback,
    ];

    pub(crate) fn table(&self) -> &'static str {
        match self {
            ModalityKind::Observations => "observations",
            ModalityKind::Parameters => "parameters",
            ModalityKind::SkeletonData => "skeleton_data",
            ModalityKind::KinematicData => "kinematic_data",
            ModalityKind::ImuData => "imu_data",
            ModalityKind::TactileFeedback => "tactile_feedback",
        }
    }

    /// Column on `task_info` that points at the latest record of this kind.
    pub(crate) fn link_column(&self) -> &'static str {
        match self {
            ModalityKind::Observations => "observations_id",
            ModalityKind::Parameters => "parameters_id",
            ModalityKind::SkeletonData => "skeletonData_id",
            ModalityKind::KinematicData => "kinematicData_id",
            ModalityKind::ImuData => "imu_id",
            ModalityKind::TactileFeedback => "tactile_feedback_id",
        }
    }
}

// ============================================================================
// Modality records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservations {
    pub video_path: String,
    pub depth_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParameters {
    pub parameters_path: String,
}

/// Missing formats are stored as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSkeletonData {
    pub fbx_path: String,
    pub bvh_path: String,
    pub csv_path: String,
    pub npy_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKinematicData {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImuData {
    pub left_hand_path: String,
    pub right_hand_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTactileFeedback {
    pub left_hand_path: String,
    pub right_hand_path: String,
}

/// Every record a single reconciliation pass wants to create. Absent kinds
/// leave the matching task link untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalityBatch {
    pub episode_id: String,
    pub observations: Option<NewObservations>,
    pub parameters: Option<NewParameters>,
    pub skeleton: Option<NewSkeletonData>,
    pub kinematic: Option<NewKinematicData>,
    pub imu: Option<NewImuData>,
    pub tactile: Option<NewTactileFeedback>,
}

impl ModalityBatch {
    pub fn new(episode_id: impl Into<String>) -> Self {
        Self {
            episode_id: episode_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_none()
            && self.parameters.is_none()
            && self.skeleton.is_none()
            && self.kinematic.is_none()
            && self.imu.is_none()
            && self.tactile.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observations {
    pub id: i64,
    pub task_info_id: i64,
    pub episode_id: String,
    pub video_path: String,
    pub depth_path: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameters {
    pub id: i64,
    pub task_info_id: i64,
    pub episode_id: String,
    pub parameters_path: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkeletonData {
    pub id: i64,
    pub task_info_id: i64,
    pub episode_id: String,
    pub fbx_path: String,
    pub bvh_path: String,
    pub csv_path: String,
    pub npy_path: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KinematicData {
    pub id: i64,
    pub task_info_id: i64,
    pub episode_id: String,
    pub path: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImuData {
    pub id: i64,
    pub task_info_id: i64,
    pub episode_id: String,
    #[serde(rename = "leftHandIMU_path")]
    pub left_hand_path: String,
    #[serde(rename = "rightHandIMU_path")]
    pub right_hand_path: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TactileFeedback {
    pub id: i64,
    pub task_info_id: i64,
    pub episode_id: String,
    #[serde(rename = "leftHandTac_path")]
    pub left_hand_path: String,
    #[serde(rename = "rightHandTac_path")]
    pub right_hand_path: String,
    pub created_at: i64,
}
