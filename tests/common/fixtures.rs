use data_collection_server::metadata_store::{MetadataStore, NewTask, TaskRecord};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

pub const WIPE_TABLE_ARCHIVE_NAME: &str = "wipe_table_upload_1700000000_ab12cd34.zip";
pub const WIPE_TABLE_FOLDER: &str = "wipe_table_42_7";
pub const WIPE_TABLE_TASK_ID: &str = "42";
pub const WIPE_TABLE_EPISODE_ID: &str = "7";

/// Builds an in-memory archive. Entries ending in `/` become directories.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

/// `wipe_table_42_7/` with one video and one left-hand IMU file.
pub fn wipe_table_archive() -> Vec<u8> {
    build_zip(&[
        ("wipe_table_42_7/video/cam1.mp4", b"video"),
        ("wipe_table_42_7/IMU/left_hand.bin", b"imu"),
    ])
}

pub fn create_wipe_table_task(store: &dyn MetadataStore) -> TaskRecord {
    store
        .create_task(&NewTask {
            task_id: WIPE_TABLE_TASK_ID.to_string(),
            episode_id: Some(WIPE_TABLE_EPISODE_ID.to_string()),
            task_name: "wipe_table".to_string(),
            init_scene_text: Some("sponge on the right".to_string()),
            action_config: Some(serde_json::json!([{"action": "wipe"}])),
        })
        .unwrap()
}
