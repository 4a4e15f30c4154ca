use super::models::*;
use super::schema::METADATA_VERSIONED_SCHEMAS;
use super::MetadataStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const TASK_COLUMNS: &str = "id, task_id, episode_id, task_name, init_scene_text, action_config, \
    task_status, observations_id, parameters_id, skeletonData_id, kinematicData_id, imu_id, \
    tactile_feedback_id, created_at, completed_at";

pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), METADATA_VERSIONED_SCHEMAS, "metadata")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        METADATA_VERSIONED_SCHEMAS
            .last()
            .context("No metadata schema")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Metadata store connection mutex poisoned"))
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Corrupt stored values surface as row errors rather than defaults.
    fn invalid_column(
        row: &rusqlite::Row,
        column: &str,
        err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> rusqlite::Error {
        match row.as_ref().column_index(column) {
            Ok(index) => {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into())
            }
            Err(e) => e,
        }
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
        let action_config: String = row.get("action_config")?;
        let action_config = serde_json::from_str(&action_config)
            .map_err(|e| Self::invalid_column(row, "action_config", e))?;
        let task_status: String = row.get("task_status")?;
        let task_status = TaskStatus::parse(&task_status).ok_or_else(|| {
            Self::invalid_column(
                row,
                "task_status",
                format!("Unknown task status {:?}", task_status),
            )
        })?;
        Ok(TaskRecord {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            episode_id: row.get("episode_id")?,
            task_name: row.get("task_name")?,
            init_scene_text: row.get("init_scene_text")?,
            action_config,
            task_status,
            links: TaskLinks {
                observations_id: row.get("observations_id")?,
                parameters_id: row.get("parameters_id")?,
                skeleton_data_id: row.get("skeletonData_id")?,
                kinematic_data_id: row.get("kinematicData_id")?,
                imu_id: row.get("imu_id")?,
                tactile_feedback_id: row.get("tactile_feedback_id")?,
            },
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn query_task(
        conn: &Connection,
        where_clause: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {} FROM task_info {}", TASK_COLUMNS, where_clause);
        let task = conn
            .query_row(&sql, params![param], Self::row_to_task)
            .optional()?;
        Ok(task)
    }

    /// Inserts one modality row and points the task link at it.
    fn insert_and_link(
        tx: &Transaction,
        kind: ModalityKind,
        task_record_id: i64,
        episode_id: &str,
        paths: &[(&str, &str)],
        created_at: i64,
    ) -> Result<i64> {
        let mut columns = vec!["task_info_id", "episode_id"];
        columns.extend(paths.iter().map(|(column, _)| *column));
        columns.push("created_at");

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");

        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&task_record_id, &episode_id];
        for (_, value) in paths {
            values.push(value);
        }
        values.push(&created_at);

        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                kind.table(),
                columns.join(", "),
                placeholders
            ),
            values.as_slice(),
        )
        .with_context(|| format!("Failed to insert {} record", kind.table()))?;
        let record_id = tx.last_insert_rowid();

        tx.execute(
            &format!(
                "UPDATE task_info SET {} = ?1 WHERE id = ?2",
                kind.link_column()
            ),
            params![record_id, task_record_id],
        )?;
        Ok(record_id)
    }
}

impl MetadataStore for SqliteMetadataStore {
    // ==================== Tasks ====================

    fn create_task(&self, task: &NewTask) -> Result<TaskRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let action_config = task
            .action_config
            .clone()
            .unwrap_or(serde_json::Value::Array(vec![]));
        // Unique placeholder until the row id is known.
        let episode_id = task
            .episode_id
            .clone()
            .unwrap_or_else(|| format!("pending-{}", uuid::Uuid::new_v4().simple()));

        tx.execute(
            "INSERT INTO task_info (task_id, episode_id, task_name, init_scene_text, \
             action_config, task_status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.task_id,
                episode_id,
                task.task_name,
                task.init_scene_text,
                serde_json::to_string(&action_config)?,
                TaskStatus::Pending.as_str(),
                Self::now_millis(),
            ],
        )
        .with_context(|| format!("Failed to create task record for episode {}", episode_id))?;
        let id = tx.last_insert_rowid();

        if task.episode_id.is_none() {
            tx.execute(
                "UPDATE task_info SET episode_id = ?1 WHERE id = ?2",
                params![id.to_string(), id],
            )?;
        }

        let record = Self::query_task(&tx, "WHERE id = ?1", &id)?
            .context("Task record vanished after insert")?;
        tx.commit()?;
        Ok(record)
    }

    fn get_task(&self, id: i64) -> Result<Option<TaskRecord>> {
        let conn = self.lock()?;
        Self::query_task(&conn, "WHERE id = ?1", &id)
    }

    fn get_task_by_episode(&self, episode_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.lock()?;
        Self::query_task(&conn, "WHERE episode_id = ?1", &episode_id)
    }

    fn find_latest_task_by_business_id(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.lock()?;
        Self::query_task(&conn, "WHERE task_id = ?1 ORDER BY id DESC LIMIT 1", &task_id)
    }

    fn list_tasks_by_business_id(&self, task_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM task_info WHERE task_id = ?1 ORDER BY id ASC",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![task_id], Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    // ==================== Modality records ====================

    fn commit_reconciliation(
        &self,
        task_record_id: i64,
        batch: &ModalityBatch,
    ) -> Result<TaskLinks> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM task_info WHERE id = ?1",
                params![task_record_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            bail!("Task record {} not found", task_record_id);
        }

        let now = Self::now_millis();
        let episode_id = batch.episode_id.as_str();

        if let Some(obs) = &batch.observations {
            Self::insert_and_link(
                &tx,
                ModalityKind::Observations,
                task_record_id,
                episode_id,
                &[
                    ("video_path", obs.video_path.as_str()),
                    ("depth_path", obs.depth_path.as_str()),
                ],
                now,
            )?;
        }
        if let Some(parameters) = &batch.parameters {
            Self::insert_and_link(
                &tx,
                ModalityKind::Parameters,
                task_record_id,
                episode_id,
                &[("parameters_path", parameters.parameters_path.as_str())],
                now,
            )?;
        }
        if let Some(skeleton) = &batch.skeleton {
            Self::insert_and_link(
                &tx,
                ModalityKind::SkeletonData,
                task_record_id,
                episode_id,
                &[
                    ("fbx_path", skeleton.fbx_path.as_str()),
                    ("bvh_path", skeleton.bvh_path.as_str()),
                    ("csv_path", skeleton.csv_path.as_str()),
                    ("npy_path", skeleton.npy_path.as_str()),
                ],
                now,
            )?;
        }
        if let Some(kinematic) = &batch.kinematic {
            Self::insert_and_link(
                &tx,
                ModalityKind::KinematicData,
                task_record_id,
                episode_id,
                &[("path", kinematic.path.as_str())],
                now,
            )?;
        }
        if let Some(imu) = &batch.imu {
            Self::insert_and_link(
                &tx,
                ModalityKind::ImuData,
                task_record_id,
                episode_id,
                &[
                    ("leftHandIMU_path", imu.left_hand_path.as_str()),
                    ("rightHandIMU_path", imu.right_hand_path.as_str()),
                ],
                now,
            )?;
        }
        if let Some(tactile) = &batch.tactile {
            Self::insert_and_link(
                &tx,
                ModalityKind::TactileFeedback,
                task_record_id,
                episode_id,
                &[
                    ("leftHandTac_path", tactile.left_hand_path.as_str()),
                    ("rightHandTac_path", tactile.right_hand_path.as_str()),
                ],
                now,
            )?;
        }

        let links = Self::query_task(&tx, "WHERE id = ?1", &task_record_id)?
            .map(|t| t.links)
            .context("Task record vanished during reconciliation")?;
        tx.commit()?;
        Ok(links)
    }

    fn get_observations(&self, id: i64) -> Result<Option<Observations>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, task_info_id, episode_id, video_path, depth_path, created_at \
                 FROM observations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Observations {
                        id: row.get(0)?,
                        task_info_id: row.get(1)?,
                        episode_id: row.get(2)?,
                        video_path: row.get(3)?,
                        depth_path: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn get_parameters(&self, id: i64) -> Result<Option<Parameters>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, task_info_id, episode_id, parameters_path, created_at \
                 FROM parameters WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Parameters {
                        id: row.get(0)?,
                        task_info_id: row.get(1)?,
                        episode_id: row.get(2)?,
                        parameters_path: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn get_skeleton_data(&self, id: i64) -> Result<Option<SkeletonData>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, task_info_id, episode_id, fbx_path, bvh_path, csv_path, npy_path, \
                 created_at FROM skeleton_data WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SkeletonData {
                        id: row.get(0)?,
                        task_info_id: row.get(1)?,
                        episode_id: row.get(2)?,
                        fbx_path: row.get(3)?,
                        bvh_path: row.get(4)?,
                        csv_path: row.get(5)?,
                        npy_path: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn get_kinematic_data(&self, id: i64) -> Result<Option<KinematicData>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, task_info_id, episode_id, path, created_at \
                 FROM kinematic_data WHERE id = ?1",
                params![id],
                |row| {
                    Ok(KinematicData {
                        id: row.get(0)?,
                        task_info_id: row.get(1)?,
                        episode_id: row.get(2)?,
                        path: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn get_imu_data(&self, id: i64) -> Result<Option<ImuData>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, task_info_id, episode_id, leftHandIMU_path, rightHandIMU_path, \
                 created_at FROM imu_data WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ImuData {
                        id: row.get(0)?,
                        task_info_id: row.get(1)?,
                        episode_id: row.get(2)?,
                        left_hand_path: row.get(3)?,
                        right_hand_path: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn get_tactile_feedback(&self, id: i64) -> Result<Option<TactileFeedback>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, task_info_id, episode_id, leftHandTac_path, rightHandTac_path, \
                 created_at FROM tactile_feedback WHERE id = ?1",
                params![id],
                |row| {
                    Ok(TactileFeedback {
                        id: row.get(0)?,
                        task_info_id: row.get(1)?,
                        episode_id: row.get(2)?,
                        left_hand_path: row.get(3)?,
                        right_hand_path: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn count_records(&self, kind: ModalityKind, task_record_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE task_info_id = ?1",
                kind.table()
            ),
            params![task_record_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_task(task_id: &str, episode_id: Option<&str>) -> NewTask {
        NewTask {
            task_id: task_id.to_string(),
            episode_id: episode_id.map(|s| s.to_string()),
            task_name: "wipe_table".to_string(),
            init_scene_text: Some("a cluttered table".to_string()),
            action_config: Some(serde_json::json!([{"action": "wipe"}])),
        }
    }

    #[test]
    fn create_task_with_explicit_episode() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let task = store.create_task(&new_task("42", Some("7"))).unwrap();

        assert_eq!(task.task_id, "42");
        assert_eq!(task.episode_id, "7");
        assert_eq!(task.task_status, TaskStatus::Pending);
        assert_eq!(task.links, TaskLinks::default());
        assert_eq!(task.action_config, serde_json::json!([{"action": "wipe"}]));

        let fetched = store.get_task_by_episode("7").unwrap().unwrap();
        assert_eq!(fetched, task);
    }

    #[test]
    fn create_task_without_episode_uses_record_id() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let task = store.create_task(&new_task("42", None)).unwrap();
        assert_eq!(task.episode_id, task.id.to_string());
    }

    #[test]
    fn duplicate_episode_is_rejected() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.create_task(&new_task("42", Some("7"))).unwrap();
        assert!(store.create_task(&new_task("43", Some("7"))).is_err());
    }

    #[test]
    fn latest_task_by_business_id() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.create_task(&new_task("42", Some("1"))).unwrap();
        let newer = store.create_task(&new_task("42", Some("2"))).unwrap();
        store.create_task(&new_task("99", Some("3"))).unwrap();

        let latest = store.find_latest_task_by_business_id("42").unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert!(store
            .find_latest_task_by_business_id("nope")
            .unwrap()
            .is_none());

        let all = store.list_tasks_by_business_id("42").unwrap();
        let episodes: Vec<_> = all.iter().map(|t| t.episode_id.as_str()).collect();
        assert_eq!(episodes, vec!["1", "2"]);
    }

    #[test]
    fn commit_reconciliation_links_only_present_kinds() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let task = store.create_task(&new_task("42", Some("7"))).unwrap();

        let mut first = ModalityBatch::new("7");
        first.parameters = Some(NewParameters {
            parameters_path: "wipe_table_42_7/parameters/cam.json".to_string(),
        });
        let links = store.commit_reconciliation(task.id, &first).unwrap();
        let parameters_id = links.parameters_id.unwrap();

        let mut second = ModalityBatch::new("7");
        second.observations = Some(NewObservations {
            video_path: "wipe_table_42_7/video/cam1.mp4".to_string(),
            depth_path: String::new(),
        });
        second.imu = Some(NewImuData {
            left_hand_path: "wipe_table_42_7/IMU/left.bin".to_string(),
            right_hand_path: String::new(),
        });
        let links = store.commit_reconciliation(task.id, &second).unwrap();

        assert_eq!(links.parameters_id, Some(parameters_id));
        assert!(links.skeleton_data_id.is_none());

        let obs = store
            .get_observations(links.observations_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(obs.video_path, "wipe_table_42_7/video/cam1.mp4");
        assert_eq!(obs.task_info_id, task.id);
        assert_eq!(obs.episode_id, "7");

        let imu = store.get_imu_data(links.imu_id.unwrap()).unwrap().unwrap();
        assert_eq!(imu.left_hand_path, "wipe_table_42_7/IMU/left.bin");
        assert_eq!(imu.right_hand_path, "");

        let stored = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(stored.links, links);
    }

    #[test]
    fn commit_reconciliation_for_unknown_task_writes_nothing() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let mut batch = ModalityBatch::new("7");
        batch.kinematic = Some(NewKinematicData {
            path: "x/kinematic".to_string(),
        });

        assert!(store.commit_reconciliation(123, &batch).is_err());
        assert_eq!(
            store.count_records(ModalityKind::KinematicData, 123).unwrap(),
            0
        );
    }

    #[test]
    fn failed_commit_rolls_back_earlier_inserts() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let task = store.create_task(&new_task("42", Some("7"))).unwrap();

        // Break the last table written by a commit so the pass fails midway.
        store
            .lock()
            .unwrap()
            .execute("DROP TABLE tactile_feedback", [])
            .unwrap();

        let mut batch = ModalityBatch::new("7");
        batch.observations = Some(NewObservations {
            video_path: "v.mp4".to_string(),
            depth_path: String::new(),
        });
        batch.tactile = Some(NewTactileFeedback {
            left_hand_path: "l.bin".to_string(),
            right_hand_path: "r.bin".to_string(),
        });

        assert!(store.commit_reconciliation(task.id, &batch).is_err());
        assert_eq!(
            store.count_records(ModalityKind::Observations, task.id).unwrap(),
            0
        );
        let stored = store.get_task(task.id).unwrap().unwrap();
        assert!(stored.links.observations_id.is_none());
    }

    #[test]
    fn corrupt_task_columns_are_reported() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let broken_config = store.create_task(&new_task("42", Some("7"))).unwrap();
        let broken_status = store.create_task(&new_task("42", Some("8"))).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE task_info SET action_config = '[{not json' WHERE id = ?1",
                params![broken_config.id],
            )
            .unwrap();
            conn.execute(
                "UPDATE task_info SET task_status = 'archived' WHERE id = ?1",
                params![broken_status.id],
            )
            .unwrap();
        }

        assert!(store.get_task(broken_config.id).is_err());
        let err = store.get_task(broken_status.id).unwrap_err();
        assert!(format!("{:#}", err).contains("archived"));
        assert!(store.list_tasks_by_business_id("42").is_err());
    }

    #[test]
    fn reopening_validates_existing_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let store = SqliteMetadataStore::new(&path).unwrap();
            store.create_task(&new_task("42", Some("7"))).unwrap();
        }
        let reopened = SqliteMetadataStore::new(&path).unwrap();
        assert!(reopened.get_task_by_episode("7").unwrap().is_some());
    }
}
