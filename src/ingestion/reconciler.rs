//! Links the files of a freshly unpacked bundle to its task record.

use super::naming::{
    find_first_file_by_extension, map_subdirectories, parse_folder_triplet, pick_left_right_pair,
    relative_path_string,
};
use crate::metadata_store::{
    MetadataStore, ModalityBatch, ModalityKind, NewImuData, NewKinematicData, NewObservations,
    NewParameters, NewSkeletonData, NewTactileFeedback, TaskLinks, TaskRecord,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const VIDEO_DIR: &str = "video";
pub const PARAMETERS_DIR: &str = "parameters";
pub const SKELETON_DIR: &str = "skeleton";
pub const KINEMATIC_DIR: &str = "kinematic";
pub const IMU_DIR: &str = "IMU";
pub const TACTILE_DIR: &str = "Tactile";

const CATEGORY_DIRS: [&str; 6] = [
    IMU_DIR,
    KINEMATIC_DIR,
    PARAMETERS_DIR,
    SKELETON_DIR,
    TACTILE_DIR,
    VIDEO_DIR,
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];
const PARAMETER_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "txt"];

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Metadata store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Why a bundle was left unlinked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Folder name is not `<taskName>_<taskId>_<episodeId>`.
    UnparsableFolderName(String),
    /// Neither the episode id nor the business task id matched a task.
    NoMatchingTask {
        business_task_id: String,
        episode_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// A task matched but the bundle held no recognizable modality files.
    NothingToLink { task_record_id: i64 },
    Linked {
        task_record_id: i64,
        created: Vec<ModalityKind>,
        links: TaskLinks,
    },
}

/// Consumes an unpacked bundle directory.
pub trait BundleReconciler: Send + Sync {
    fn reconcile(&self, bundle_root: &Path) -> Result<ReconcileOutcome, ReconcileError>;
}

pub struct Reconciler {
    store: Arc<dyn MetadataStore>,
    upload_root: PathBuf,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MetadataStore>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            upload_root: upload_root.into(),
        }
    }

    /// Episode id first, then the newest task of the business task id.
    fn resolve_task(
        &self,
        business_task_id: &str,
        episode_id: &str,
    ) -> anyhow::Result<Option<TaskRecord>> {
        if let Some(task) = self.store.get_task_by_episode(episode_id)? {
            return Ok(Some(task));
        }
        self.store.find_latest_task_by_business_id(business_task_id)
    }

    fn rel(&self, path: &Path) -> String {
        relative_path_string(path, &self.upload_root)
    }

    /// Collects one record per modality found under `bundle_root`.
    pub fn build_batch(&self, bundle_root: &Path, episode_id: &str) -> ModalityBatch {
        let dirs = map_subdirectories(bundle_root, &CATEGORY_DIRS);
        let dir = |name: &str| dirs.get(name).and_then(|d| d.as_deref());

        let mut batch = ModalityBatch::new(episode_id);

        batch.observations =
            find_first_file_by_extension(dir(VIDEO_DIR), VIDEO_EXTENSIONS).map(|video| {
                NewObservations {
                    video_path: self.rel(&video),
                    depth_path: String::new(),
                }
            });

        batch.parameters = find_first_file_by_extension(dir(PARAMETERS_DIR), PARAMETER_EXTENSIONS)
            .map(|file| NewParameters {
                parameters_path: self.rel(&file),
            });

        let skeleton_file = |ext: &str| {
            find_first_file_by_extension(dir(SKELETON_DIR), &[ext])
                .map(|p| self.rel(&p))
                .unwrap_or_default()
        };
        let skeleton = NewSkeletonData {
            fbx_path: skeleton_file("fbx"),
            bvh_path: skeleton_file("bvh"),
            csv_path: skeleton_file("csv"),
            npy_path: skeleton_file("npy"),
        };
        if skeleton != NewSkeletonData::default() {
            batch.skeleton = Some(skeleton);
        }

        batch.kinematic = dir(KINEMATIC_DIR).map(|d| NewKinematicData { path: self.rel(d) });

        batch.imu = match pick_left_right_pair(dir(IMU_DIR)) {
            (None, None) => None,
            (left, right) => Some(NewImuData {
                left_hand_path: left.map(|p| self.rel(&p)).unwrap_or_default(),
                right_hand_path: right.map(|p| self.rel(&p)).unwrap_or_default(),
            }),
        };

        batch.tactile = match pick_left_right_pair(dir(TACTILE_DIR)) {
            (None, None) => None,
            (left, right) => Some(NewTactileFeedback {
                left_hand_path: left.map(|p| self.rel(&p)).unwrap_or_default(),
                right_hand_path: right.map(|p| self.rel(&p)).unwrap_or_default(),
            }),
        };

        batch
    }
}

fn created_kinds(batch: &ModalityBatch) -> Vec<ModalityKind> {
    let present = [
        batch.observations.is_some(),
        batch.parameters.is_some(),
        batch.skeleton.is_some(),
        batch.kinematic.is_some(),
        batch.imu.is_some(),
        batch.tactile.is_some(),
    ];
    ModalityKind::ALL
        .iter()
        .zip(present)
        .filter(|(_, present)| *present)
        .map(|(kind, _)| *kind)
        .collect()
}

impl BundleReconciler for Reconciler {
    fn reconcile(&self, bundle_root: &Path) -> Result<ReconcileOutcome, ReconcileError> {
        let folder_name = bundle_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(triplet) = parse_folder_triplet(&folder_name) else {
            warn!(
                "Bundle folder {:?} does not follow <task>_<taskId>_<episodeId>, not linking",
                folder_name
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::UnparsableFolderName(
                folder_name,
            )));
        };

        let Some(task) = self.resolve_task(&triplet.business_task_id, &triplet.episode_id)? else {
            warn!(
                "No task record for episode {} or task {}, not linking {:?}",
                triplet.episode_id, triplet.business_task_id, bundle_root
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::NoMatchingTask {
                business_task_id: triplet.business_task_id,
                episode_id: triplet.episode_id,
            }));
        };
        debug!(
            "Bundle {:?} resolved to task record {} ({})",
            folder_name, task.id, task.task_name
        );

        let batch = self.build_batch(bundle_root, &triplet.episode_id);
        if batch.is_empty() {
            warn!("No recognizable modality files in {:?}", bundle_root);
            return Ok(ReconcileOutcome::NothingToLink {
                task_record_id: task.id,
            });
        }

        // Re-ingesting an episode adds new records and repoints the task
        // links at them; earlier records stay in the store unreferenced.
        let links = self.store.commit_reconciliation(task.id, &batch)?;
        let created = created_kinds(&batch);
        info!(
            "Linked {} modality record(s) from {:?} to task record {}",
            created.len(),
            folder_name,
            task.id
        );

        Ok(ReconcileOutcome::Linked {
            task_record_id: task.id,
            created,
            links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::{NewTask, SqliteMetadataStore};
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
    }

    fn setup() -> (TempDir, Arc<SqliteMetadataStore>, Reconciler) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let reconciler = Reconciler::new(store.clone(), dir.path());
        (dir, store, reconciler)
    }

    fn add_task(store: &SqliteMetadataStore, task_id: &str, episode_id: &str) -> TaskRecord {
        store
            .create_task(&NewTask {
                task_id: task_id.to_string(),
                episode_id: Some(episode_id.to_string()),
                task_name: "wipe_table".to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn links_every_modality() {
        let (dir, store, reconciler) = setup();
        let task = add_task(&store, "42", "7");
        let bundle = dir.path().join("wipe_table_42_7");
        touch(&bundle, "video/cam2.mp4");
        touch(&bundle, "video/cam1.mp4");
        touch(&bundle, "parameters/camera.yaml");
        touch(&bundle, "skeleton/body.bvh");
        touch(&bundle, "skeleton/body.npy");
        touch(&bundle, "kinematic/joints.csv");
        touch(&bundle, "IMU/left_hand.bin");
        touch(&bundle, "Tactile/l_glove.csv");
        touch(&bundle, "Tactile/r_glove.csv");

        let outcome = reconciler.reconcile(&bundle).unwrap();
        let ReconcileOutcome::Linked { created, links, .. } = outcome else {
            panic!("expected linked outcome");
        };
        assert_eq!(created.len(), 6);

        let obs = store
            .get_observations(links.observations_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(obs.video_path, "wipe_table_42_7/video/cam1.mp4");
        assert_eq!(obs.depth_path.as_deref(), Some(""));

        let params = store
            .get_parameters(links.parameters_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(params.parameters_path, "wipe_table_42_7/parameters/camera.yaml");

        let skeleton = store
            .get_skeleton_data(links.skeleton_data_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(skeleton.fbx_path, "");
        assert_eq!(skeleton.bvh_path, "wipe_table_42_7/skeleton/body.bvh");
        assert_eq!(skeleton.csv_path, "");
        assert_eq!(skeleton.npy_path, "wipe_table_42_7/skeleton/body.npy");

        let kinematic = store
            .get_kinematic_data(links.kinematic_data_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(kinematic.path, "wipe_table_42_7/kinematic");

        let imu = store.get_imu_data(links.imu_id.unwrap()).unwrap().unwrap();
        assert_eq!(imu.left_hand_path, "wipe_table_42_7/IMU/left_hand.bin");
        assert_eq!(imu.right_hand_path, "");

        let tactile = store
            .get_tactile_feedback(links.tactile_feedback_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(tactile.left_hand_path, "wipe_table_42_7/Tactile/l_glove.csv");
        assert_eq!(tactile.right_hand_path, "wipe_table_42_7/Tactile/r_glove.csv");

        assert_eq!(store.get_task(task.id).unwrap().unwrap().links, links);
    }

    #[test]
    fn category_lookup_ignores_case() {
        let (dir, store, reconciler) = setup();
        add_task(&store, "42", "7");
        let bundle = dir.path().join("wipe_table_42_7");
        touch(&bundle, "VIDEO/cam.MKV");
        touch(&bundle, "imu/a.bin");

        let batch = reconciler.build_batch(&bundle, "7");
        assert_eq!(
            batch.observations.unwrap().video_path,
            "wipe_table_42_7/VIDEO/cam.MKV"
        );
        assert_eq!(batch.imu.unwrap().left_hand_path, "wipe_table_42_7/imu/a.bin");
    }

    #[test]
    fn unparsable_folder_is_skipped() {
        let (dir, store, reconciler) = setup();
        let task = add_task(&store, "42", "7");
        let bundle = dir.path().join("wipe_table");
        touch(&bundle, "video/cam1.mp4");

        let outcome = reconciler.reconcile(&bundle).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::UnparsableFolderName("wipe_table".into()))
        );
        assert_eq!(
            store
                .count_records(ModalityKind::Observations, task.id)
                .unwrap(),
            0
        );
    }

    #[test]
    fn unknown_task_is_skipped() {
        let (dir, _store, reconciler) = setup();
        let bundle = dir.path().join("wipe_table_42_7");
        touch(&bundle, "video/cam1.mp4");

        let outcome = reconciler.reconcile(&bundle).unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::NoMatchingTask { .. })
        ));
    }

    #[test]
    fn falls_back_to_latest_task_of_business_id() {
        let (dir, store, reconciler) = setup();
        add_task(&store, "42", "1");
        let latest = add_task(&store, "42", "2");
        let bundle = dir.path().join("wipe_table_42_99");
        touch(&bundle, "parameters/p.json");

        let outcome = reconciler.reconcile(&bundle).unwrap();
        let ReconcileOutcome::Linked { task_record_id, .. } = outcome else {
            panic!("expected linked outcome");
        };
        assert_eq!(task_record_id, latest.id);
    }

    #[test]
    fn bundle_without_modalities_links_nothing() {
        let (dir, store, reconciler) = setup();
        let task = add_task(&store, "42", "7");
        let bundle = dir.path().join("wipe_table_42_7");
        touch(&bundle, "video/readme.md");

        let outcome = reconciler.reconcile(&bundle).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::NothingToLink {
                task_record_id: task.id
            }
        );
    }

    #[test]
    fn reingestion_creates_new_records_and_repoints_links() {
        let (dir, store, reconciler) = setup();
        let task = add_task(&store, "42", "7");
        let bundle = dir.path().join("wipe_table_42_7");
        touch(&bundle, "video/cam1.mp4");

        reconciler.reconcile(&bundle).unwrap();
        let first = store.get_task(task.id).unwrap().unwrap().links;
        reconciler.reconcile(&bundle).unwrap();
        let second = store.get_task(task.id).unwrap().unwrap().links;

        assert_ne!(first.observations_id, second.observations_id);
        assert_eq!(
            store
                .count_records(ModalityKind::Observations, task.id)
                .unwrap(),
            2
        );
    }
}
