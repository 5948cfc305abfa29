use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fileport_core::{
    load_config, validate_config, CatalogGateway, CommandLineCatalog, FileService,
    HttpProxyIssuer, LocalProcessRunner, ProcessRunner, ProxyIssuer, SqliteTransactionStore,
    TransactionStore,
};
use fileport_server::api::create_router;
use fileport_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("FILEPORT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        database = ?config.database.path,
        staging = ?config.staging.root,
        "Configuration loaded"
    );

    // Create SQLite transaction store
    let store: Arc<dyn TransactionStore> = Arc::new(
        SqliteTransactionStore::new(&config.database.path)
            .context("Failed to create transaction store")?,
    );
    info!("Transaction store initialized");

    tokio::fs::create_dir_all(&config.staging.root)
        .await
        .with_context(|| format!("Failed to create staging root {:?}", config.staging.root))?;
    tokio::fs::create_dir_all(&config.proxy.dir)
        .await
        .with_context(|| format!("Failed to create proxy directory {:?}", config.proxy.dir))?;

    let processes: Arc<dyn ProcessRunner> = Arc::new(LocalProcessRunner::new());
    let catalog: Arc<dyn CatalogGateway> = Arc::new(CommandLineCatalog::new(
        config.catalog.clone(),
        Arc::clone(&processes),
    ));
    info!(
        "Using catalog {} (transfer signature '{}')",
        catalog.name(),
        catalog.transfer_signature()
    );

    let issuer: Arc<dyn ProxyIssuer> = Arc::new(
        HttpProxyIssuer::new(&config.proxy).context("Failed to create proxy issuer")?,
    );

    let service = FileService::new(&config, store, catalog, processes, issuer);
    service
        .seed_registry(&config.registry)
        .context("Failed to seed registry")?;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), Arc::new(service)));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {} (public URL {})", addr, config.server.base_url());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
