use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use data_collection_server::config::{AppConfig, CliConfig, FileConfig};
use data_collection_server::ingestion::{FileHandler, Reconciler};
use data_collection_server::server::ServerConfig;
use data_collection_server::{
    run_server, ExportEngine, ExtractionWorkerPool, MetadataStore, RequestsLoggingLevel,
    SqliteMetadataStore, UploadIntake,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI ones.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory receiving uploaded archives and their unpacked bundles.
    #[clap(long, value_parser = parse_path)]
    pub upload_dir: Option<PathBuf>,

    /// Directory receiving exports. Defaults to <upload-dir>/metadata_export.
    #[clap(long, value_parser = parse_path)]
    pub export_dir: Option<PathBuf>,

    /// Directory holding metadata.db. Defaults to the upload dir.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// How many archives may be unpacked at the same time.
    #[clap(long)]
    pub max_concurrent_extractions: Option<usize>,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            upload_dir: args.upload_dir.clone(),
            export_dir: args.export_dir.clone(),
            db_dir: args.db_dir.clone(),
            port: args.port,
            max_concurrent_extractions: args.max_concurrent_extractions,
            logging_level: args.logging_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&CliConfig::from(&cli_args), file_config)?;

    std::fs::create_dir_all(&config.db_dir)
        .with_context(|| format!("Failed to create db dir {:?}", config.db_dir))?;
    info!(
        "Opening SQLite metadata database at {:?}...",
        config.metadata_db_path()
    );
    let store: Arc<dyn MetadataStore> =
        Arc::new(SqliteMetadataStore::new(config.metadata_db_path())?);

    let file_handler = Arc::new(FileHandler::new(
        &config.upload_dir,
        config.ingestion.max_upload_bytes(),
    ));
    file_handler.init().await?;

    let shutdown = CancellationToken::new();

    let reconciler = Arc::new(Reconciler::new(store.clone(), &config.upload_dir));
    let pool = ExtractionWorkerPool::start(
        file_handler,
        reconciler,
        config.extraction_settings(),
        shutdown.child_token(),
    );
    let intake = Arc::new(UploadIntake::new(pool.clone()));
    let export_engine = ExportEngine::new(store, config.export_settings());

    // Prune finished upload and export jobs from their registries.
    {
        let pool = pool.clone();
        let export_engine = export_engine.clone();
        let shutdown = shutdown.clone();
        let retention = Duration::from_secs(config.ingestion.job_retention_secs);
        let interval = Duration::from_secs(config.ingestion.cleanup_interval_secs);
        info!(
            "Job cleanup every {}s, retaining finished jobs for {}s",
            interval.as_secs(),
            retention.as_secs()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            // Skip the first immediate tick, wait for the first interval
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.cleanup(retention);
                        export_engine.cleanup(retention);
                    }
                }
            }
        });
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        max_upload_size: config.ingestion.max_upload_bytes(),
        job_retention_secs: config.ingestion.job_retention_secs,
    };

    info!("Ready to serve at port {}!", config.port);
    run_server(server_config, intake, export_engine, shutdown).await
}
