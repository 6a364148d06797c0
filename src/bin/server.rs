//! SheetSync Server
//!
//! Serves the operational HTTP surface and drains the change log in the
//! background.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SHEETSYNC_CONFIG`: Path to config file (default: ~/.config/sheetsync/config.yaml)
//! - `SHEETSYNC_PORT`: Port to listen on (default: 8080)
//! - `SHEETSYNC_API_KEY`: Bearer key required on every route but `/health`
//! - `SHEETSYNC_ACCESS_TOKEN`: Sheets API token
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /config/tables`: Configured table mappings
//! - `POST /sync/relation-to-sheet`, `POST /sync/sheet-to-relation`: Run a batch
//! - `POST /sync/bidirectional`: Start a batch in the background
//! - `GET /sync/status`: Last batch and ledger flags
//! - `POST /change-log/process`, `POST /change-log/cleanup`, `GET /change-log/stats`

use sheetsync::config::Config;
use sheetsync::server::{router, AppState};
use sheetsync_core::SyncContext;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sheetsync=info,sheetsync_server=info,sheetsync_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("SHEETSYNC_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path)?;
    if let Some(path) = &config.config_file {
        tracing::info!("Config file: {}", path.display());
    }
    tracing::info!("Database: {}", config.database_path.value.display());
    if config.api_key.value.is_none() {
        tracing::warn!("No API key configured - all routes are open");
    }

    let sheets = config.sheet_provider(false)?;
    let ctx = Arc::new(SyncContext::open(config.context_options(sheets)?).await?);

    let processor = ctx.change_log_processor();
    processor
        .start_processing(ctx.settings().polling_interval())
        .await?;

    let state = AppState::new(ctx.clone(), config.api_key.value.clone());
    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.value));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    ctx.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
