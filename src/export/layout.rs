//! Canonical export tree and the copy of ingested bundles into it.
//!
//! ```text
//! <export>/observations/<taskId>/<episodeId>/{videos,depth}
//! <export>/parameters/<taskId>/<episodeId>/camera
//! <export>/{skeletonData,kinematicData,imu,tactileFeedback,tactile_feedback}/<taskId>/<episodeId>
//! ```

use crate::ingestion::naming::map_subdirectories;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Placeholder used when a folder name does not carry a trailing pair.
pub const UNKNOWN_SEGMENT: &str = "unknown";

/// Directory name under the ingestion root that never holds a task bundle.
pub const RESERVED_EXPORT_DIR: &str = "metadata_export";

/// Leaf directories created for every exported episode, relative to
/// `<category>/<taskId>/<episodeId>`.
const CANONICAL_SUBTREE: &[(&str, &[&str])] = &[
    ("observations", &["videos", "depth"]),
    ("parameters", &["camera"]),
    ("skeletonData", &[]),
    ("kinematicData", &[]),
    ("imu", &[]),
    ("tactileFeedback", &[]),
    ("tactile_feedback", &[]),
];

/// Source category -> (target category, sub directory below the episode).
const CATEGORY_MAP: &[(&str, &str, Option<&str>)] = &[
    ("parameters", "parameters", None),
    ("skeleton", "skeletonData", None),
    ("kinematic", "kinematicData", None),
    ("IMU", "imu", None),
    ("Tactile", "tactileFeedback", None),
    ("tactileFeedback", "tactileFeedback", None),
    ("tactile_feedback", "tactile_feedback", None),
    ("video", "observations", Some("videos")),
];

/// Business task id and episode id taken from the last two `_` segments of a
/// folder name. Both fall back to [`UNKNOWN_SEGMENT`] when there are fewer
/// than two segments.
pub fn parse_trailing_pair(name: &str) -> (String, String) {
    let segments: Vec<&str> = name.split('_').collect();
    if segments.len() < 2 {
        return (UNKNOWN_SEGMENT.to_string(), UNKNOWN_SEGMENT.to_string());
    }
    let n = segments.len();
    (segments[n - 2].to_string(), segments[n - 1].to_string())
}

pub fn episode_dir(export_dir: &Path, category: &str, task_id: &str, episode_id: &str) -> PathBuf {
    export_dir.join(category).join(task_id).join(episode_id)
}

/// Creates every canonical directory for one episode.
pub fn create_canonical_tree(export_dir: &Path, task_id: &str, episode_id: &str) -> io::Result<()> {
    for (category, leaves) in CANONICAL_SUBTREE {
        let base = episode_dir(export_dir, category, task_id, episode_id);
        if leaves.is_empty() {
            fs::create_dir_all(&base)?;
        }
        for leaf in leaves.iter() {
            fs::create_dir_all(base.join(leaf))?;
        }
    }
    Ok(())
}

/// Copies every recognized category of `task_dir` into its canonical place
/// and returns the number of files copied.
pub fn export_task_dir(
    task_dir: &Path,
    export_dir: &Path,
    task_id: &str,
    episode_id: &str,
) -> io::Result<usize> {
    let names: Vec<&str> = CATEGORY_MAP.iter().map(|(source, _, _)| *source).collect();
    let found = map_subdirectories(task_dir, &names);

    let mut copied = 0;
    for (source, target, sub) in CATEGORY_MAP {
        let Some(Some(source_dir)) = found.get(source) else {
            continue;
        };
        let mut destination = episode_dir(export_dir, target, task_id, episode_id);
        if let Some(sub) = sub {
            destination = destination.join(sub);
        }
        let count = merge_copy(source_dir, &destination)?;
        debug!("Copied {} files from {:?} to {:?}", count, source_dir, destination);
        copied += count;
    }
    Ok(copied)
}

/// Recursively copies `src` into `dst`, merging with whatever `dst` already
/// holds. Existing files are overwritten. Symlinks are not followed.
pub fn merge_copy(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
