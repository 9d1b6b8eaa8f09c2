//! Crop Disease Inference Server
//!
//! HTTP endpoint for crop disease prediction. On startup the model artifact
//! and label list are downloaded from object storage; when that fails the
//! server still starts and serves random predictions.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crop_disease::backend::{backend_name, default_device, InferenceBackend};
use crop_disease::inference::{bootstrap, BootstrapConfig, DiseaseTable};
use crop_disease::storage::{StoreConfig, DEFAULT_BUCKET};
use crop_disease::utils::logging::{init_logging, parse_level, LogConfig};
use crop_disease::MODEL_PREFIX;

use crate::state::AppState;

/// Crop Disease Inference Server
#[derive(Parser, Debug)]
#[command(name = "crop-disease-server")]
#[command(version = "0.1.0")]
#[command(about = "HTTP inference endpoint for crop disease prediction")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bucket holding the model artifact
    #[arg(long, env = "GCS_BUCKET_NAME", default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Cloud project id
    #[arg(long, env = "GCP_PROJECT_ID")]
    project: Option<String>,

    /// Use a local directory as the object store
    #[arg(long, env = "STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Disease-info JSON overriding the built-in table
    #[arg(long, env = "DISEASE_INFO_PATH")]
    disease_info: Option<PathBuf>,

    /// Object-store prefix of the model artifact
    #[arg(long, default_value = MODEL_PREFIX)]
    model_prefix: String,

    /// Local directory the model is downloaded into
    #[arg(long, env = "MODEL_CACHE_DIR")]
    model_cache: Option<PathBuf>,

    /// Largest accepted `/predict` body in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = routes::DEFAULT_BODY_LIMIT)]
    max_body_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::production()
    };
    if let Some(level) = cli.log_level.as_deref() {
        log_config.level = parse_level(level);
    }
    let _ = init_logging(&log_config);

    info!("Crop Disease Inference Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Backend:      {}", backend_name());
    info!("  Bucket:       {}", cli.bucket);
    info!("  Project:      {}", cli.project.as_deref().unwrap_or("<default>"));
    info!("  Model prefix: {}", cli.model_prefix);
    info!("  Body limit:   {} bytes", cli.max_body_bytes);

    // The disease table must load; a bad override is a configuration error
    let diseases = DiseaseTable::load(cli.disease_info.as_deref())?;
    info!("  Disease records: {}", diseases.len());

    let store_config = StoreConfig {
        bucket: cli.bucket.clone(),
        project_id: cli.project.clone(),
        storage_root: cli.storage_root.clone(),
    };
    let mut boot = BootstrapConfig {
        model_prefix: cli.model_prefix.clone(),
        ..BootstrapConfig::default()
    };
    if let Some(cache) = cli.model_cache.clone() {
        boot.cache_dir = cache;
    }

    info!("Loading model from Cloud Storage...");
    let service = tokio::task::spawn_blocking(move || {
        bootstrap::<InferenceBackend>(&store_config, &boot, diseases, default_device())
    })
    .await?;

    if !service.is_model_loaded() {
        warn!("No model loaded; serving random predictions");
    }
    info!("Serving {} class labels", service.labels().len());

    let app = routes::router(Arc::new(AppState::new(service)), cli.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
