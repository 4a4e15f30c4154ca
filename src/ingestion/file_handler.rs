//! File handling for uploaded bundle archives.

use std::ffi::OsStr;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Errors that can occur during file handling.
#[derive(Debug, Error)]
pub enum FileHandlerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),

    #[error("Zip extraction error: {0}")]
    ZipError(String),
}

/// Entries added by desktop archivers (macOS Finder mostly) that are not
/// part of the recorded bundle.
fn is_archiver_metadata(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name == "__MACOSX" || name == ".DS_Store" || name.starts_with("._")
}

impl From<zip::result::ZipError> for FileHandlerError {
    fn from(e: zip::result::ZipError) -> Self {
        FileHandlerError::ZipError(e.to_string())
    }
}

/// Where an archive will be unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPlan {
    /// Directory that receives the bundle contents.
    pub target_dir: PathBuf,
    /// Top-level directory every entry lives under, dropped while unpacking.
    pub strip_prefix: Option<PathBuf>,
}

/// Stores uploaded archives under the upload root and unpacks them.
pub struct FileHandler {
    upload_dir: PathBuf,
    max_file_size: u64,
}

impl FileHandler {
    pub fn new(upload_dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_file_size,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Creates the upload directory.
    pub async fn init(&self) -> Result<(), FileHandlerError> {
        fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    /// Persists uploaded bytes as `<upload_dir>/<upload_id>.zip`.
    pub async fn save_upload(
        &self,
        upload_id: &str,
        data: &[u8],
    ) -> Result<PathBuf, FileHandlerError> {
        let size = data.len() as u64;
        if size > self.max_file_size {
            return Err(FileHandlerError::FileTooLarge(size, self.max_file_size));
        }

        let file_name = sanitize_filename(&format!("{}.zip", upload_id))?;
        self.init().await?;

        let path = self.upload_dir.join(file_name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Check if a file is a zip archive.
    pub fn is_zip(filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("zip"))
            .unwrap_or(false)
    }

    /// Decides where `zip_path` should be unpacked.
    ///
    /// An archive whose entries all sit below one top-level directory is
    /// unpacked as that directory under the upload root. Anything else goes
    /// into `<upload_dir>/<fallback_folder>`.
    pub fn plan_extraction(
        &self,
        zip_path: &Path,
        fallback_folder: &str,
    ) -> Result<ExtractionPlan, FileHandlerError> {
        let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;

        let mut wrapper: Option<PathBuf> = None;
        let mut single_wrapper = true;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let Some(name) = entry.enclosed_name() else {
                continue;
            };
            let mut components = name.components();
            let first = match components.next() {
                Some(Component::Normal(c)) if !is_archiver_metadata(c) => PathBuf::from(c),
                _ => continue,
            };
            // A file at the top level means there is no wrapper directory.
            if components.next().is_none() && !entry.is_dir() {
                single_wrapper = false;
                break;
            }
            match &wrapper {
                None => wrapper = Some(first),
                Some(w) if *w == first => {}
                Some(_) => {
                    single_wrapper = false;
                    break;
                }
            }
        }

        let plan = match wrapper.filter(|_| single_wrapper) {
            Some(dir) => ExtractionPlan {
                target_dir: self.upload_dir.join(&dir),
                strip_prefix: Some(dir),
            },
            None => ExtractionPlan {
                target_dir: self.upload_dir.join(sanitize_filename(fallback_folder)?),
                strip_prefix: None,
            },
        };
        Ok(plan)
    }

    /// Unpacks `zip_path` according to `plan` and returns the number of files
    /// written. Blocking; run it off the async runtime.
    pub fn unpack(&self, zip_path: &Path, plan: &ExtractionPlan) -> Result<usize, FileHandlerError> {
        std::fs::create_dir_all(&plan.target_dir)?;
        let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;

        let mut written = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let Some(name) = entry.enclosed_name() else {
                warn!(
                    "Skipping archive entry outside the bundle: {:?} in {:?}",
                    entry.name(),
                    zip_path
                );
                continue;
            };
            if name.iter().any(is_archiver_metadata) {
                continue;
            }
            let relative = match &plan.strip_prefix {
                Some(prefix) => match name.strip_prefix(prefix) {
                    Ok(rest) => rest.to_path_buf(),
                    Err(_) => continue,
                },
                None => name,
            };
            if relative.as_os_str().is_empty() {
                continue;
            }

            let out_path = plan.target_dir.join(&relative);
            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
            written += 1;
        }
        Ok(written)
    }

    /// Deletes an archive file.
    pub fn remove_archive(zip_path: &Path) -> Result<(), FileHandlerError> {
        std::fs::remove_file(zip_path)?;
        Ok(())
    }
}

/// Recovers the intended bundle folder name from an uploaded file name.
///
/// Devices name archives `<folder>_upload_<timestamp>_<random>.zip`; the part
/// before the first `upload` segment is the folder. Any other name yields
/// `None`, and the caller falls back to the generated upload id.
pub fn recover_folder_name(original_filename: &str) -> Option<String> {
    let name = Path::new(original_filename)
        .file_name()
        .and_then(|n| n.to_str())?;
    if !name.contains('_') || !name.ends_with(".zip") {
        return None;
    }
    let stem = &name[..name.len() - ".zip".len()];
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.iter().position(|p| *p == "upload") {
        Some(index) if index > 0 => Some(parts[..index].join("_")),
        _ => None,
    }
}

/// Sanitize a filename to prevent path traversal attacks.
fn sanitize_filename(filename: &str) -> Result<String, FileHandlerError> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FileHandlerError::InvalidFilename(filename.to_string()))?;

    if name.contains('\0') || name.starts_with('.') {
        return Err(FileHandlerError::InvalidFilename(filename.to_string()));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        return Err(FileHandlerError::InvalidFilename(filename.to_string()));
    }
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[&str]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for entry in entries {
            if entry.ends_with('/') {
                zip.add_directory(*entry, options).unwrap();
            } else {
                zip.start_file(*entry, options).unwrap();
                zip.write_all(entry.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_is_zip() {
        assert!(FileHandler::is_zip("bundle.zip"));
        assert!(FileHandler::is_zip("bundle.ZIP"));
        assert!(!FileHandler::is_zip("bundle.tar"));
        assert!(!FileHandler::is_zip("bundle"));
    }

    #[test]
    fn test_recover_folder_name() {
        assert_eq!(
            recover_folder_name("wipe_table_upload_1700000000_ab12cd34.zip"),
            Some("wipe_table".to_string())
        );
        assert_eq!(
            recover_folder_name("/sdcard/out/pick_cup_42_7_upload_1_ff.zip"),
            Some("pick_cup_42_7".to_string())
        );
        // `upload` as the first segment is not a marker.
        assert_eq!(recover_folder_name("upload_1_ab.zip"), None);
        assert_eq!(recover_folder_name("wipe_table_42_7.zip"), None);
        assert_eq!(recover_folder_name("bundle.zip"), None);
        assert_eq!(recover_folder_name("wipe_table_upload_1.tar"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("bundle.zip").unwrap(), "bundle.zip");
        assert_eq!(sanitize_filename("../bundle.zip").unwrap(), "bundle.zip");
        assert_eq!(sanitize_filename("a:b.zip").unwrap(), "a_b.zip");
        assert!(sanitize_filename(".hidden").is_err());
        assert!(sanitize_filename("..").is_err());
    }

    #[tokio::test]
    async fn save_upload_writes_archive_and_enforces_size() {
        let dir = TempDir::new().unwrap();
        let handler = FileHandler::new(dir.path().join("uploads"), 8);

        let path = handler.save_upload("upload_1_ab", b"1234").await.unwrap();
        assert_eq!(path, dir.path().join("uploads").join("upload_1_ab.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), b"1234");

        let err = handler
            .save_upload("upload_2_ab", b"123456789")
            .await
            .unwrap_err();
        assert!(matches!(err, FileHandlerError::FileTooLarge(9, 8)));
    }

    #[test]
    fn single_top_level_directory_becomes_bundle() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(
            &zip_path,
            &[
                "wipe_table_42_7/",
                "wipe_table_42_7/video/cam1.mp4",
                "wipe_table_42_7/IMU/left_hand.bin",
            ],
        );

        let handler = FileHandler::new(dir.path(), u64::MAX);
        let plan = handler.plan_extraction(&zip_path, "wipe_table").unwrap();
        assert_eq!(plan.target_dir, dir.path().join("wipe_table_42_7"));

        let written = handler.unpack(&zip_path, &plan).unwrap();
        assert_eq!(written, 2);
        assert!(dir.path().join("wipe_table_42_7/video/cam1.mp4").is_file());
        assert!(dir.path().join("wipe_table_42_7/IMU/left_hand.bin").is_file());
    }

    #[test]
    fn flat_archive_uses_fallback_folder() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(&zip_path, &["video/cam1.mp4", "IMU/left.bin"]);

        let handler = FileHandler::new(dir.path(), u64::MAX);
        let plan = handler.plan_extraction(&zip_path, "pick_1_2").unwrap();
        assert_eq!(plan.target_dir, dir.path().join("pick_1_2"));
        assert_eq!(plan.strip_prefix, None);

        handler.unpack(&zip_path, &plan).unwrap();
        assert!(dir.path().join("pick_1_2/video/cam1.mp4").is_file());
    }

    #[test]
    fn top_level_file_prevents_wrapper_detection() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(&zip_path, &["bundle/video/cam1.mp4", "readme.txt"]);

        let handler = FileHandler::new(dir.path(), u64::MAX);
        let plan = handler.plan_extraction(&zip_path, "fallback").unwrap();
        assert_eq!(plan.target_dir, dir.path().join("fallback"));
    }

    #[test]
    fn archiver_metadata_is_ignored() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(
            &zip_path,
            &[
                "wipe_table_42_7/video/cam1.mp4",
                "wipe_table_42_7/.DS_Store",
                "__MACOSX/",
                "__MACOSX/wipe_table_42_7/video/._cam1.mp4",
                ".DS_Store",
            ],
        );

        let handler = FileHandler::new(dir.path(), u64::MAX);
        let plan = handler.plan_extraction(&zip_path, "wipe_table").unwrap();
        assert_eq!(plan.target_dir, dir.path().join("wipe_table_42_7"));

        let written = handler.unpack(&zip_path, &plan).unwrap();
        assert_eq!(written, 1);
        assert!(dir.path().join("wipe_table_42_7/video/cam1.mp4").is_file());
        assert!(!dir.path().join("wipe_table_42_7/.DS_Store").exists());
        assert!(!dir.path().join("__MACOSX").exists());

        // Without a wrapper the metadata is not unpacked either.
        let flat_path = dir.path().join("b.zip");
        write_zip(
            &flat_path,
            &["video/cam1.mp4", "IMU/left.bin", "__MACOSX/video/._cam1.mp4"],
        );
        let plan = handler.plan_extraction(&flat_path, "pick_1_2").unwrap();
        assert_eq!(plan.target_dir, dir.path().join("pick_1_2"));
        assert_eq!(handler.unpack(&flat_path, &plan).unwrap(), 2);
        assert!(!dir.path().join("pick_1_2/__MACOSX").exists());
    }

    #[test]
    fn unpack_into_existing_directory_is_fine() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(&zip_path, &["x_1_2/kinematic/joints.csv"]);
        std::fs::create_dir_all(dir.path().join("x_1_2")).unwrap();

        let handler = FileHandler::new(dir.path(), u64::MAX);
        let plan = handler.plan_extraction(&zip_path, "unused").unwrap();
        assert_eq!(handler.unpack(&zip_path, &plan).unwrap(), 1);
    }

    #[test]
    fn corrupt_archive_is_a_zip_error() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("bad.zip");
        std::fs::write(&zip_path, b"not a zip").unwrap();

        let handler = FileHandler::new(dir.path(), u64::MAX);
        let err = handler.plan_extraction(&zip_path, "x").unwrap_err();
        assert!(matches!(err, FileHandlerError::ZipError(_)));
    }
}
