//! Folder naming conventions and file selection inside an unpacked bundle.
//!
//! Bundle folders are named `<taskName>_<businessTaskId>_<episodeId>`, where
//! the task name may itself contain underscores. File selection always walks
//! directories in file-name order so repeated runs pick the same files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SEPARATOR: char = '_';

/// The three parts encoded in a bundle folder name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTriplet {
    pub task_name: String,
    pub business_task_id: String,
    pub episode_id: String,
}

/// Splits `<taskName>_<businessTaskId>_<episodeId>`. Names with fewer than
/// three segments do not match.
pub fn parse_folder_triplet(name: &str) -> Option<FolderTriplet> {
    let segments: Vec<&str> = name.split(SEPARATOR).collect();
    if segments.len() < 3 {
        return None;
    }
    let (head, tail) = segments.split_at(segments.len() - 2);
    Some(FolderTriplet {
        task_name: head.join("_"),
        business_task_id: tail[0].to_string(),
        episode_id: tail[1].to_string(),
    })
}

/// Resolves each requested category name against the immediate children of
/// `root`, ignoring case. Missing categories (or a missing root) map to `None`.
pub fn map_subdirectories<'a>(
    root: &Path,
    names: &[&'a str],
) -> HashMap<&'a str, Option<PathBuf>> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    // An exact-case match wins over a case-folded one; otherwise first by name.
    children.sort();

    names
        .iter()
        .map(|&name| {
            let exact = children
                .iter()
                .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(name));
            let resolved = exact.or_else(|| {
                children.iter().find(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.eq_ignore_ascii_case(name))
                        .unwrap_or(false)
                })
            });
            (name, resolved.cloned())
        })
        .collect()
}

/// Every file below `dir`, visiting each directory's entries in file-name order.
fn sorted_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// First file under `dir` (recursively, sorted) whose extension is one of
/// `exts`, compared case-insensitively.
pub fn find_first_file_by_extension(dir: Option<&Path>, exts: &[&str]) -> Option<PathBuf> {
    let dir = dir?;
    if !dir.is_dir() {
        return None;
    }
    sorted_files(dir)
        .into_iter()
        .find(|p| has_extension(p, exts))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hand {
    Left,
    Right,
}

impl Hand {
    fn matches(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        let stem = Path::new(&lower)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&lower)
            .to_string();
        let (word, prefix, suffix) = match self {
            Hand::Left => ("left", "l_", "_l"),
            Hand::Right => ("right", "r_", "_r"),
        };
        lower.contains(word) || lower.starts_with(prefix) || stem.ends_with(suffix)
    }
}

/// Picks a (left, right) pair of files under `dir`.
///
/// Keyword matches win. Without a left match the first file is used; without
/// a right match the second file is used when there is one.
pub fn pick_left_right_pair(dir: Option<&Path>) -> (Option<PathBuf>, Option<PathBuf>) {
    let files = match dir {
        Some(d) if d.is_dir() => sorted_files(d),
        _ => return (None, None),
    };

    let find = |hand: Hand| {
        files
            .iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| hand.matches(n))
                    .unwrap_or(false)
            })
            .cloned()
    };

    let left = find(Hand::Left).or_else(|| files.first().cloned());
    let right = find(Hand::Right).or_else(|| files.get(1).cloned());
    (left, right)
}

/// Path of `path` relative to `root`, with `/` separators on every platform.
/// Paths outside `root` are returned unchanged, normalized the same way.
pub fn relative_path_string(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
