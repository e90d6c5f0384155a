use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_drop::{
    api,
    cli::{run_token_command, run_user_command, Cli, Command},
    config::{Config, MetadataEngine},
    data::{DataBackend, FileBackend, StreamBackend},
    manager::UploadManager,
    metadata::{Database, MemoryBackend, MetadataBackend},
    sweeper::Sweeper,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Load configuration
    let config = Config::load()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::User { command } => {
            let metadata = open_persistent_metadata(&config)?;
            println!("{}", run_user_command(&metadata, command)?);
            Ok(())
        }
        Command::Token { command } => {
            let metadata = open_persistent_metadata(&config)?;
            println!("{}", run_token_command(&metadata, command)?);
            Ok(())
        }
    }
}

/// Account commands need the engine the server reads.
fn open_persistent_metadata(config: &Config) -> anyhow::Result<Database> {
    if config.storage.metadata != MetadataEngine::Redb {
        anyhow::bail!("account commands need METADATA_BACKEND=redb");
    }
    Ok(Database::open(&config.node.data_dir)?)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "file-drop starting");

    // Initialize metadata engine
    let metadata: Arc<dyn MetadataBackend> = match config.storage.metadata {
        MetadataEngine::Redb => {
            let db = Database::open(&config.node.data_dir)?;
            info!("Database opened at: {}", config.node.data_dir);
            Arc::new(db)
        }
        MetadataEngine::Memory => {
            tracing::warn!("Using in-memory metadata, uploads are lost on restart");
            Arc::new(MemoryBackend::new())
        }
    };

    // Initialize data backends
    let data: Arc<dyn DataBackend> = Arc::new(FileBackend::new(&config.storage.file_storage_path)?);
    info!(
        "Using file data backend at: {}",
        config.storage.file_storage_path
    );
    let stream: Option<Arc<dyn DataBackend>> = if config.uploads.stream {
        Some(Arc::new(StreamBackend::new()))
    } else {
        None
    };

    let manager = Arc::new(UploadManager::new(
        Arc::clone(&metadata),
        Arc::clone(&data),
        stream,
        config.uploads.clone(),
    ));

    // Start the expired uploads sweeper
    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(Arc::clone(&metadata), data, &config.sweeper);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        metadata,
        manager,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: stop background tasks
    info!("Shutting down background tasks");
    shutdown.cancel();
    if let Err(e) = sweeper_handle.await {
        tracing::error!(error = %e, "Sweeper task failed during shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
