// crates/inference-dam-cli/src/main.rs
// ============================================================================
// Module: Inference Dam CLI Entry Point
// Description: Command dispatcher for the broker server.
// Purpose: Resolve configuration, open storage, and serve the HTTP surface.
// Dependencies: clap, inference-dam-api, inference-dam-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! `inference-dam serve` resolves configuration (defaults, then `PORT` and
//! `STORAGE_PATH`, then flags), opens the SQLite store, ensures the default
//! namespace, and serves the broker with graceful shutdown on SIGINT and
//! SIGTERM. In-flight dispatch runs are awaited and buffered writes drained
//! before exit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use inference_dam_api::AppState;
use inference_dam_api::ConfigError;
use inference_dam_api::ServerConfig;
use inference_dam_api::build_router;
use inference_dam_api::ensure_default_namespace;
use inference_dam_core::Store;
use inference_dam_core::StoreError;
use inference_dam_dispatcher::Dispatcher;
use inference_dam_dispatcher::ProviderError;
use inference_dam_store_sqlite::SqliteStore;
use inference_dam_store_sqlite::SqliteStoreConfig;
use inference_dam_store_sqlite::SqliteStoreError;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "inference-dam", version, about = "Durable inference request broker")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the broker server.
    Serve(ServeCommand),
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Listen port (falls back to PORT, then 8080).
    #[arg(long)]
    port: Option<u16>,
    /// Database path (falls back to STORAGE_PATH).
    #[arg(long, value_name = "PATH")]
    storage_path: Option<PathBuf>,
    /// Buffer submissions and commit them in batches.
    #[arg(long)]
    batched_writes: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fatal serve errors.
#[derive(Debug, Error)]
enum ServeError {
    /// Configuration was invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Storage failed to open or bootstrap.
    #[error("storage error: {0}")]
    Storage(#[from] SqliteStoreError),
    /// Default namespace bootstrap failed.
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] StoreError),
    /// Provider client construction failed.
    #[error("provider client error: {0}")]
    Provider(#[from] ProviderError),
    /// Listener or server I/O failure.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(command) => serve(command).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal");
            ExitCode::FAILURE
        }
    }
}

/// Runs the broker server until a shutdown signal arrives.
async fn serve(command: ServeCommand) -> Result<(), ServeError> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = command.port {
        config.port = port;
    }
    if let Some(path) = command.storage_path {
        config.storage_path = path;
    }
    config.batched_writes = command.batched_writes;
    config.validate()?;

    let mut store_config = SqliteStoreConfig::new(&config.storage_path);
    store_config.batched_writes = config.batched_writes;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(store_config)?);
    ensure_default_namespace(store.as_ref()).await?;

    let dispatcher = Dispatcher::with_http_client(Arc::clone(&store), config.dispatcher.clone())?;
    let state = AppState {
        store: Arc::clone(&store),
        dispatcher: dispatcher.clone(),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, path = %config.storage_path.display(), "inference dam listening");
    axum_serve(listener, app).await?;

    tracing::info!("shutting down");
    dispatcher.wait().await;
    store.close().await?;
    Ok(())
}

/// Serves the router with graceful shutdown on SIGINT/SIGTERM.
async fn axum_serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
) -> Result<(), std::io::Error> {
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
