//! SQLite schema for the metadata database.
//!
//! `task_info` holds one row per recorded episode; every modality table
//! references it through `task_info_id`. Timestamps are Unix milliseconds.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const TASK_INFO_FK: ForeignKey = ForeignKey {
    foreign_table: "task_info",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const TASK_INFO_TABLE_V1: Table = Table {
    name: "task_info",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("task_id", &SqlType::Text, non_null = true),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("task_name", &SqlType::Text, non_null = true),
        sqlite_column!("init_scene_text", &SqlType::Text),
        sqlite_column!(
            "action_config",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!(
            "task_status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!("observations_id", &SqlType::Integer),
        sqlite_column!("parameters_id", &SqlType::Integer),
        sqlite_column!("skeletonData_id", &SqlType::Integer),
        sqlite_column!("kinematicData_id", &SqlType::Integer),
        sqlite_column!("imu_id", &SqlType::Integer),
        sqlite_column!("tactile_feedback_id", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[("idx_task_info_task_id", "task_id")],
};

const OBSERVATIONS_TABLE_V1: Table = Table {
    name: "observations",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "task_info_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_INFO_FK)
        ),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true),
        sqlite_column!("video_path", &SqlType::Text, non_null = true),
        sqlite_column!("depth_path", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_observations_task", "task_info_id")],
};

const PARAMETERS_TABLE_V1: Table = Table {
    name: "parameters",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "task_info_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_INFO_FK)
        ),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true),
        sqlite_column!("parameters_path", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_parameters_task", "task_info_id")],
};

const SKELETON_DATA_TABLE_V1: Table = Table {
    name: "skeleton_data",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "task_info_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_INFO_FK)
        ),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true),
        sqlite_column!("fbx_path", &SqlType::Text, non_null = true),
        sqlite_column!("bvh_path", &SqlType::Text, non_null = true),
        sqlite_column!("csv_path", &SqlType::Text, non_null = true),
        sqlite_column!("npy_path", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_skeleton_data_task", "task_info_id")],
};

// The path is the kinematic directory itself, not a single file.
const KINEMATIC_DATA_TABLE_V1: Table = Table {
    name: "kinematic_data",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "task_info_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_INFO_FK)
        ),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true),
        sqlite_column!("path", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_kinematic_data_task", "task_info_id")],
};

const IMU_DATA_TABLE_V1: Table = Table {
    name: "imu_data",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "task_info_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_INFO_FK)
        ),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true),
        sqlite_column!("leftHandIMU_path", &SqlType::Text, non_null = true),
        sqlite_column!("rightHandIMU_path", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_imu_data_task", "task_info_id")],
};

const TACTILE_FEEDBACK_TABLE_V1: Table = Table {
    name: "tactile_feedback",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "task_info_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_INFO_FK)
        ),
        sqlite_column!("episode_id", &SqlType::Text, non_null = true),
        sqlite_column!("leftHandTac_path", &SqlType::Text, non_null = true),
        sqlite_column!("rightHandTac_path", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_tactile_feedback_task", "task_info_id")],
};

pub const METADATA_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        TASK_INFO_TABLE_V1,
        OBSERVATIONS_TABLE_V1,
        PARAMETERS_TABLE_V1,
        SKELETON_DATA_TABLE_V1,
        KINEMATIC_DATA_TABLE_V1,
        IMU_DATA_TABLE_V1,
        TACTILE_FEEDBACK_TABLE_V1,
    ],
    migration: None,
}];
