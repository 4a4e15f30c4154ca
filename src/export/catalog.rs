//! Catalog files written at the top of an export directory.

use crate::metadata_store::{MetadataStore, TaskRecord};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use super::ExportError;

pub const TASK_CATALOG_FILE: &str = "task_catalog.json";
pub const TASK_INFO_DIR: &str = "task_info";

#[derive(Debug, Serialize)]
struct LabelInfo {
    action_config: Value,
}

#[derive(Debug, Serialize)]
struct TaskInfoEntry {
    episode_id: Value,
    label_info: LabelInfo,
    task_name: String,
    init_scene_text: String,
}

impl From<TaskRecord> for TaskInfoEntry {
    fn from(record: TaskRecord) -> Self {
        let episode_id = match record.episode_id.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(record.episode_id),
        };
        Self {
            episode_id,
            label_info: LabelInfo {
                action_config: record.action_config,
            },
            task_name: record.task_name,
            init_scene_text: record.init_scene_text.unwrap_or_default(),
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExportError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Writes the empty top-level catalog placeholder.
pub fn write_task_catalog(export_dir: &Path) -> Result<(), ExportError> {
    write_json(
        &export_dir.join(TASK_CATALOG_FILE),
        &serde_json::Map::<String, Value>::new(),
    )
}

/// Writes `task_info/<businessTaskId>.json` for every id, each holding one
/// entry per task record sharing that business id.
pub fn write_task_info(
    export_dir: &Path,
    store: &dyn MetadataStore,
    business_task_ids: &[String],
) -> Result<usize, ExportError> {
    let info_dir = export_dir.join(TASK_INFO_DIR);
    fs::create_dir_all(&info_dir)?;

    for task_id in business_task_ids {
        let records = store
            .list_tasks_by_business_id(task_id)
            .with_context(|| format!("Failed to load task records for task id {}", task_id))?;
        let entries: Vec<TaskInfoEntry> = records.into_iter().map(TaskInfoEntry::from).collect();
        write_json(&info_dir.join(format!("{}.json", task_id)), &entries)?;
    }
    Ok(business_task_ids.len())
}
