mod file_config;

pub use file_config::{ExportConfig, FileConfig, IngestionConfig};

use crate::export::ExportSettings;
use crate::ingestion::ExtractionSettings;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Directory name used for exports when no export dir is configured.
pub const DEFAULT_EXPORT_DIR_NAME: &str = "metadata_export";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub upload_dir: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub max_concurrent_extractions: Option<usize>,
    pub logging_level: RequestsLoggingLevel,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub upload_dir: PathBuf,
    pub export_dir: PathBuf,
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Feature configs (with defaults)
    pub ingestion: IngestionSettings,
    pub export: ExportEngineSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let upload_dir = file
            .upload_dir
            .map(PathBuf::from)
            .or_else(|| cli.upload_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("upload_dir must be specified via --upload-dir or in config file")
            })?;
        // Created at startup when missing.
        if upload_dir.exists() && !upload_dir.is_dir() {
            bail!("upload_dir is not a directory: {:?}", upload_dir);
        }

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .unwrap_or_else(|| upload_dir.clone());
        if db_dir.exists() && !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let export_dir = file
            .export_dir
            .map(PathBuf::from)
            .or_else(|| cli.export_dir.clone())
            .unwrap_or_else(|| upload_dir.join(DEFAULT_EXPORT_DIR_NAME));

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        // Ingestion settings - merge file config with defaults
        let defaults = IngestionSettings::default();
        let ingestion_file = file.ingestion.unwrap_or_default();
        let ingestion = IngestionSettings {
            max_concurrent_extractions: ingestion_file
                .max_concurrent_extractions
                .or(cli.max_concurrent_extractions)
                .unwrap_or(defaults.max_concurrent_extractions),
            poll_interval_ms: ingestion_file
                .poll_interval_ms
                .unwrap_or(defaults.poll_interval_ms),
            extraction_timeout_secs: ingestion_file
                .extraction_timeout_secs
                .unwrap_or(defaults.extraction_timeout_secs),
            max_upload_size_mb: ingestion_file
                .max_upload_size_mb
                .unwrap_or(defaults.max_upload_size_mb),
            job_retention_secs: ingestion_file
                .job_retention_secs
                .unwrap_or(defaults.job_retention_secs),
            cleanup_interval_secs: ingestion_file
                .cleanup_interval_secs
                .unwrap_or(defaults.cleanup_interval_secs),
        };
        if ingestion.max_concurrent_extractions == 0 {
            bail!("max_concurrent_extractions must be at least 1");
        }
        if ingestion.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than 0");
        }
        if ingestion.cleanup_interval_secs == 0 {
            bail!("cleanup_interval_secs must be greater than 0");
        }

        let export = ExportEngineSettings {
            export_timeout_secs: file
                .export
                .and_then(|e| e.export_timeout_secs)
                .unwrap_or(ExportEngineSettings::default().export_timeout_secs),
        };

        Ok(Self {
            upload_dir,
            export_dir,
            db_dir,
            port,
            logging_level,
            ingestion,
            export,
        })
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.db_dir.join("metadata.db")
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            max_concurrent_extractions: self.ingestion.max_concurrent_extractions,
            poll_interval: Duration::from_millis(self.ingestion.poll_interval_ms),
            extraction_timeout: Duration::from_secs(self.ingestion.extraction_timeout_secs),
        }
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            ingest_root: self.upload_dir.clone(),
            export_root: self.export_dir.clone(),
            export_timeout: Duration::from_secs(self.export.export_timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub max_concurrent_extractions: usize,
    pub poll_interval_ms: u64,
    pub extraction_timeout_secs: u64,
    pub max_upload_size_mb: u64,
    pub job_retention_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl IngestionSettings {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 2,
            poll_interval_ms: 500,
            extraction_timeout_secs: 30 * 60,
            max_upload_size_mb: 4096,
            job_retention_secs: 60 * 60,
            cleanup_interval_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportEngineSettings {
    pub export_timeout_secs: u64,
}

impl Default for ExportEngineSettings {
    fn default() -> Self {
        Self {
            export_timeout_secs: 2 * 60 * 60,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
