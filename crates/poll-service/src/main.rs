//! Live Poll service
//!
//! Entry point: loads configuration, wires storage and the session
//! coordinator, and serves HTTP and WebSocket traffic until SIGINT/SIGTERM.

use common::secret::ExposeSecret;
use poll_service::config::Config;
use poll_service::observability::{init_metrics_recorder, init_tracing};
use poll_service::persistence::{InMemoryPollStore, PersistenceGateway, PgPollStore};
use poll_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first: it selects the log format
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(config.log_format)?;

    info!("Starting Live Poll service");
    info!(
        bind_address = %config.bind_address,
        persistence = if config.database_url.is_some() { "postgres" } else { "memory" },
        default_timer_seconds = config.default_timer_seconds,
        max_connections_per_namespace = config.max_connections_per_namespace,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let persistence: Arc<dyn PersistenceGateway> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let store = PgPollStore::connect(url.expose_secret(), config.persistence_timeout)
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;
            info!("Database connection established, migrations applied");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, polls are kept in memory only");
            Arc::new(InMemoryPollStore::new())
        }
    };

    let state = Arc::new(AppState::new(&config, persistence));
    let coordinator = state.coordinator.clone();
    let health = Arc::clone(&state.health);

    let app = routes::build_routes(Arc::clone(&state), metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    // Fail fast if the port is taken
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind {}: {}", addr, e);
        e
    })?;

    health.set_ready();
    info!("Live Poll service listening on {}", addr);

    let shutdown_timeout = config.shutdown_timeout;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;

            health.set_not_ready();

            // Close every socket before the server waits on open connections
            if let Err(e) = coordinator.shutdown(shutdown_timeout).await {
                warn!("Coordinator shutdown failed: {}", e);
            }
            coordinator.cancel();
        })
        .await?;

    info!("Live Poll service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
