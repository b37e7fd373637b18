//! Server startup and lifecycle management module.
//!
//! This module is responsible for:
//! - Initializing and launching the HTTP server
//! - Managing server lifecycle and graceful shutdown
//! - Starting the import worker pool
//! - Handling system signals for graceful termination
//!
//! The module provides the main entry point for starting the import service
//! and ensures proper initialisation of all required components including
//! database connections, the staging directory, background workers, and
//! HTTP services.

use std::sync::Arc;
use std::thread::available_parallelism;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::configuration::Settings;
use crate::domain::app_state::{App, AppPool, AppState};
use crate::net::server;
use crate::queue::worker::ImportWorker;
use crate::queue::worker_pool::WorkerPool;

/// Launches the import service with the specified configuration and database
/// connection pool.
///
/// This function performs the following actions:
/// - Builds the shared application state (pool, queue, event bus, staging).
/// - Ensures the staging directory exists.
/// - Starts the import worker pool.
/// - Starts serving requests with axum, with graceful shutdown on
///   termination signals.
///
/// # Errors
///
/// Returns an error if initialization of the listener, router, staging
/// directory, or worker pool fails, or if the server errors while running.
pub async fn launch(config: Settings, pool: AppPool) -> Result<()> {
    let token = CancellationToken::new();
    let app_state = AppState(Arc::new(App::with_pool(pool.clone(), config.clone())));

    app_state.staging.ensure_root()?;

    let mut subroutines = start_subroutines(&app_state, token.clone())?;
    let monitor = subroutines.monitor();
    info!("Worker pool monitor started!");

    let (listener, router) = server::init(app_state).await?;
    info!("Listening on {}", listener.local_addr()?);

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(token));
    info!("Import service started!");

    let (srv, _) = tokio::join!(server, monitor);
    srv.map_err(|err| {
        warn!("Server error while shutting down: {:#?}", err);
        err.into()
    })
}

/// Initializes and starts the import worker pool.
///
/// The worker count comes from the configuration; when unset it defaults to
/// half the available CPU cores, with a floor of one.
fn start_subroutines(app_state: &AppState, token: CancellationToken) -> Result<WorkerPool> {
    let mut worker_pool = WorkerPool::new(Arc::clone(&app_state.work_queue), token);

    let default_workers = (available_parallelism()?.get() / 2).max(1);
    let worker_count = app_state.settings.import.workers.unwrap_or(default_workers);
    let workers = ImportWorker::initialise_n(worker_count, app_state);
    worker_pool.add_workers(workers);

    Ok(worker_pool)
}

/// Waits for a shutdown signal in the application.
///
/// This function listens for two types of signals:
/// - `Ctrl+C` signal on all platforms.
/// - `SIGTERM` signal on Unix-based systems.
///
/// When any of these signals is received, the function returns, allowing the
/// application to proceed with a graceful shutdown.
///
/// # Panics
///
/// - If the `Ctrl+C` signal handler fails to install.
/// - On Unix-based systems, if the `SIGTERM` signal handler fails to install.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => token.cancel(),
        _ = terminate => token.cancel(),
    }

    info!("Shutting down...");
}
