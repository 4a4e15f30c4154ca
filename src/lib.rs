//! Data Collection Server Library
//!
//! Ingests multi-modal recording bundles uploaded by collection devices,
//! links the unpacked assets to task metadata and re-exports them into a
//! canonical layout.

pub mod config;
pub mod export;
pub mod ingestion;
pub mod metadata_store;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use export::ExportEngine;
pub use ingestion::{ExtractionWorkerPool, UploadIntake};
pub use metadata_store::{MetadataStore, SqliteMetadataStore};
pub use server::{run_server, RequestsLoggingLevel};
