use super::RequestsLoggingLevel;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Largest request body accepted by the upload route.
    pub max_upload_size: u64,
    /// Age threshold used by the cleanup route when none is given.
    pub job_retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 8000,
            max_upload_size: 4096 * 1024 * 1024,
            job_retention_secs: 3600,
        }
    }
}
