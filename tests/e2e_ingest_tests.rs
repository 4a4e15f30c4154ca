//! End-to-end tests for the ingestion pipeline
//!
//! Upload intake, extraction and reconciliation against a real SQLite store.

mod common;

use common::{
    build_zip, create_wipe_table_task, wipe_table_archive, TestPipeline, WIPE_TABLE_ARCHIVE_NAME,
    WIPE_TABLE_EPISODE_ID, WIPE_TABLE_FOLDER,
};
use data_collection_server::ingestion::{UploadJobStatus, UploadRequest, UploadedFile};
use data_collection_server::metadata_store::ModalityKind;

fn upload_request(filename: &str, data: Vec<u8>) -> UploadRequest {
    UploadRequest {
        file: Some(UploadedFile {
            filename: filename.to_string(),
            data,
        }),
        task_id: "42".to_string(),
        device_id: "glove-rig-1".to_string(),
        auth_token: Some("token".to_string()),
    }
}

#[tokio::test]
async fn test_uploaded_bundle_is_linked_to_its_task() {
    let pipeline = TestPipeline::spawn();
    let task = create_wipe_table_task(pipeline.store.as_ref());

    let receipt = pipeline
        .intake
        .accept(upload_request(WIPE_TABLE_ARCHIVE_NAME, wipe_table_archive()))
        .await
        .unwrap();
    let snapshot = pipeline.wait_for_upload(&receipt.upload_id).await;

    assert_eq!(snapshot.status, UploadJobStatus::Completed);
    let expected_path = pipeline
        .upload_dir()
        .join(WIPE_TABLE_FOLDER)
        .to_string_lossy()
        .into_owned();
    assert_eq!(snapshot.extract_path, Some(expected_path));
    assert!(pipeline
        .upload_dir()
        .join("wipe_table_42_7/video/cam1.mp4")
        .is_file());
    // The archive is removed once unpacked.
    assert!(!pipeline
        .upload_dir()
        .join(format!("{}.zip", receipt.upload_id))
        .exists());

    let task = pipeline.store.get_task(task.id).unwrap().unwrap();
    let observations_id = task.links.observations_id.unwrap();
    let imu_id = task.links.imu_id.unwrap();
    assert!(task.links.parameters_id.is_none());
    assert!(task.links.tactile_feedback_id.is_none());

    let observations = pipeline
        .store
        .get_observations(observations_id)
        .unwrap()
        .unwrap();
    assert_eq!(observations.episode_id, WIPE_TABLE_EPISODE_ID);
    assert_eq!(observations.video_path, "wipe_table_42_7/video/cam1.mp4");
    assert_eq!(observations.task_info_id, task.id);

    let imu = pipeline.store.get_imu_data(imu_id).unwrap().unwrap();
    assert_eq!(imu.left_hand_path, "wipe_table_42_7/IMU/left_hand.bin");
    assert_eq!(imu.right_hand_path, "");
}

#[tokio::test]
async fn test_bundle_without_wrapper_uses_recovered_folder_name() {
    let pipeline = TestPipeline::spawn();
    let task = create_wipe_table_task(pipeline.store.as_ref());

    let archive = build_zip(&[
        ("video/cam1.mp4", b"video"),
        ("Tactile/left_tac.csv", b"l"),
        ("Tactile/right_tac.csv", b"r"),
    ]);
    let receipt = pipeline
        .intake
        .accept(upload_request(
            "wipe_table_42_7_upload_1700000001_00ff00ff.zip",
            archive,
        ))
        .await
        .unwrap();
    let snapshot = pipeline.wait_for_upload(&receipt.upload_id).await;

    assert_eq!(snapshot.status, UploadJobStatus::Completed);
    assert!(pipeline
        .upload_dir()
        .join("wipe_table_42_7/Tactile/right_tac.csv")
        .is_file());

    let task = pipeline.store.get_task(task.id).unwrap().unwrap();
    let tactile = pipeline
        .store
        .get_tactile_feedback(task.links.tactile_feedback_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(tactile.left_hand_path, "wipe_table_42_7/Tactile/left_tac.csv");
    assert_eq!(tactile.right_hand_path, "wipe_table_42_7/Tactile/right_tac.csv");
}

#[tokio::test]
async fn test_corrupt_archive_fails_without_touching_the_store() {
    let pipeline = TestPipeline::spawn();
    let task = create_wipe_table_task(pipeline.store.as_ref());

    let receipt = pipeline
        .intake
        .accept(upload_request(
            WIPE_TABLE_ARCHIVE_NAME,
            b"definitely not a zip".to_vec(),
        ))
        .await
        .unwrap();
    let snapshot = pipeline.wait_for_upload(&receipt.upload_id).await;

    assert_eq!(snapshot.status, UploadJobStatus::Failed);
    assert!(!snapshot.error_message.is_empty());
    assert!(snapshot.extract_path.is_none());
    for kind in ModalityKind::ALL {
        assert_eq!(pipeline.store.count_records(kind, task.id).unwrap(), 0);
    }

    // Failed jobs stay listed.
    let list = pipeline.intake.pool().list(50, 0);
    assert_eq!(list.total, 1);
    assert_eq!(list.uploads[0].upload_id, receipt.upload_id);
}

#[tokio::test]
async fn test_bundle_for_unknown_episode_completes_unlinked() {
    let pipeline = TestPipeline::spawn();

    let receipt = pipeline
        .intake
        .accept(upload_request(WIPE_TABLE_ARCHIVE_NAME, wipe_table_archive()))
        .await
        .unwrap();
    let snapshot = pipeline.wait_for_upload(&receipt.upload_id).await;

    assert_eq!(snapshot.status, UploadJobStatus::Completed);
    assert!(pipeline
        .store
        .get_task_by_episode(WIPE_TABLE_EPISODE_ID)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_reingesting_an_episode_repoints_links() {
    let pipeline = TestPipeline::spawn();
    let task = create_wipe_table_task(pipeline.store.as_ref());

    let mut observation_ids = Vec::new();
    for _ in 0..2 {
        let receipt = pipeline
            .intake
            .accept(upload_request(WIPE_TABLE_ARCHIVE_NAME, wipe_table_archive()))
            .await
            .unwrap();
        let snapshot = pipeline.wait_for_upload(&receipt.upload_id).await;
        assert_eq!(snapshot.status, UploadJobStatus::Completed);

        let task = pipeline.store.get_task(task.id).unwrap().unwrap();
        observation_ids.push(task.links.observations_id.unwrap());
    }

    assert_ne!(observation_ids[0], observation_ids[1]);
    assert_eq!(
        pipeline
            .store
            .count_records(ModalityKind::Observations, task.id)
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_cleanup_prunes_finished_jobs_once() {
    let pipeline = TestPipeline::spawn();

    let receipt = pipeline
        .intake
        .accept(upload_request(WIPE_TABLE_ARCHIVE_NAME, wipe_table_archive()))
        .await
        .unwrap();
    pipeline.wait_for_upload(&receipt.upload_id).await;

    let pool = pipeline.intake.pool();
    assert_eq!(pool.cleanup(std::time::Duration::ZERO), 1);
    assert_eq!(pool.cleanup(std::time::Duration::ZERO), 0);
    assert!(pool.status(&receipt.upload_id).is_none());
}
