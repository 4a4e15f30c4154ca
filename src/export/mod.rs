//! Export of every ingested task folder into the canonical dataset layout.

mod catalog;
mod engine;
pub mod layout;
mod models;

pub use catalog::{TASK_CATALOG_FILE, TASK_INFO_DIR};
pub use engine::{ExportEngine, ExportError, ExportSettings};
pub use models::{ExportJob, ExportJobSnapshot, ExportJobStatus, ExportList};
