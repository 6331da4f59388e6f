use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pg_gateway::api::handlers::AppState;
use pg_gateway::api::routes::create_router_with_state;
use pg_gateway::config::Config;
use pg_gateway::services::{ConnectionPoolManager, DEFAULT_SWEEP_INTERVAL};

/// Time in-flight requests get after a shutdown signal before they are cancelled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first: the log level depends on it
    let loaded = Config::from_env();
    init_tracing(loaded.as_ref().map(|c| c.pgrest.debug).unwrap_or(false));

    let config = Arc::new(loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?);

    for connection in config.connections.iter().filter(|c| c.is_public()) {
        warn!("Auth for connection '{}' set to public.", connection.name);
    }

    let pool_manager = Arc::new(ConnectionPoolManager::with_config(
        config.pgrest.max_pool_size,
        config.pool_idle_timeout(),
    ));
    let sweep = Arc::clone(&pool_manager).start_idle_sweep(DEFAULT_SWEEP_INTERVAL);

    let requests = CancellationToken::new();
    let app = create_router_with_state(AppState::new(
        Arc::clone(&config),
        Arc::clone(&pool_manager),
        requests.clone(),
    ));

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(requests))
        .await?;

    pool_manager.close_all().await;
    if let Err(e) = sweep.await {
        warn!("Idle pool sweep ended abnormally: {}", e);
    }
    info!("Server stopped");

    Ok(())
}

/// `RUST_LOG` wins; otherwise `debug` when the config asks for it, else `info`.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

/// Resolves on SIGINT or SIGTERM and schedules cancellation of in-flight requests.
async fn shutdown_signal(requests: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!(
        "Shutdown signal received, cancelling remaining requests in {}s",
        SHUTDOWN_GRACE.as_secs()
    );
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        requests.cancel();
    });
}
