// =============================================================================
// Storefront Backend - API Server Entry Point
// =============================================================================
// Table of Contents:
// 1. Main Entry Point
// 2. Shutdown Signal
// =============================================================================

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_backend::config::Config;
use storefront_backend::db::Database;
use storefront_backend::{create_router, AppState};

// -----------------------------------------------------------------------------
// 1. Main Entry Point
// -----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables from the working directory or the crate
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_filename("crates/storefront/.env");
    }

    let config = Config::from_env()?;
    let bind_addr = config.bind_address.clone();

    // Ensure database directory exists for SQLite
    let db_path = config
        .database_url
        .trim_start_matches("sqlite:")
        .trim_start_matches("//");
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let db = Database::new(&config.database_url, config.database_max_connections).await?;
    db.run_migrations().await?;

    if config.reconcile_on_startup {
        let reconciled = db.reconcile_all().await?;
        tracing::info!(reconciled, "Startup review aggregate sweep finished");
    }

    let state = AppState {
        config: Arc::new(config),
        db,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Storefront API Server running on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

// -----------------------------------------------------------------------------
// 2. Shutdown Signal
// -----------------------------------------------------------------------------

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}
