//! Reservation manager server entry point.
//!
//! Bootstraps the storage backend, plugin registry, and lease orchestrator,
//! then starts the Axum HTTP server with graceful shutdown. The event
//! scheduler runs alongside the server as a background task and is
//! cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use reservation_core::{
    Clock, Dispatcher, Executor, LeaseOrchestrator, NotificationEmitter, NotificationSink,
    PluginRegistry, Scheduler, Store, SystemClock,
};
use reservation_storage::{MemoryBackend, StorageBackend};

use reservation_server::config::{ServerConfig, StorageBackendType};
use reservation_server::routes;
use reservation_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        event_interval_secs = config.event_interval_secs,
        plugins = ?config.plugins,
        "reservation manager starting"
    );

    let (state, scheduler) = build_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = {
        let interval_secs = config.event_interval_secs;
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(interval_secs, rx).await })
    };

    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "reservation manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for scheduler to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), scheduler_handle).await;

    info!("reservation manager stopped");
    Ok(())
}

/// Build the shared application state and return it along with the
/// scheduler, which the caller spawns as its own background task so it can
/// race the shutdown signal independently of the HTTP server.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<(Arc<AppState>, Scheduler)> {
    let backend: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!("using PostgreSQL storage");
            Arc::new(
                reservation_storage::PostgresBackend::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!("PostgreSQL backend requested but feature 'postgres-backend' is not enabled");
        }
    };

    let store = Store::new(backend);

    let factories = reservation_plugins::factories();
    let plugins = Arc::new(
        PluginRegistry::load(&config.plugins, &factories)
            .await
            .context("failed to load configured resource plugins")?,
    );

    let sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(reservation_core::notification::LoggingSink)];
    let notifications = Arc::new(NotificationEmitter::new(sinks));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let orchestrator = Arc::new(LeaseOrchestrator::new(
        store.clone(),
        Arc::clone(&plugins),
        Arc::clone(&notifications),
        Arc::clone(&clock),
        config.manager.clone(),
    ));

    let executor = Arc::new(Executor::new(
        store.clone(),
        Arc::clone(&plugins),
        Arc::clone(&notifications),
        Arc::clone(&clock),
        config.manager.event_max_retries,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&orchestrator),
        Arc::clone(&plugins),
        Arc::clone(&executor),
    ));

    let scheduler = Scheduler::new(store.clone(), (*executor).clone(), clock);

    let state = Arc::new(AppState {
        orchestrator,
        dispatcher,
        executor,
        plugins,
        store,
    });

    Ok((state, scheduler))
}

/// Build the Axum router with all routes and middleware.
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/v1/leases", routes::leases::router())
        .nest("/v1/rpc", routes::rpc::router())
        .nest("/v1/health", routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
