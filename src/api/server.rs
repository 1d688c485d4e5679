use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_alert, get_alert, health_check, list_alerts, parse_payload, resolve_alert, AppState,
};
use crate::alerts::{SweepWorker, TimeoutChecker, WebhookNotifier};
use crate::config::{Config, StoreBackend};
use crate::retention::RetentionReaper;
use crate::storage::{AlertStore, MemoryAlertStore, SqliteAlertStore};

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Ingestion
        .route("/api/alert", post(create_alert))
        .route("/api/parse", post(parse_payload))
        // Query
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/:id", get(get_alert))
        .route("/api/alerts/:id/resolve", post(resolve_alert))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn open_store(config: &Config) -> Result<Arc<dyn AlertStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn AlertStore> = match config.store {
        StoreBackend::Sqlite => {
            tracing::info!(path = %config.db_path, "Opening SQLite alert store");
            Arc::new(SqliteAlertStore::open(&config.db_path, config.tz)?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory alert store, records are lost on restart");
            Arc::new(MemoryAlertStore::new(config.tz))
        }
    };
    Ok(store)
}

/// Run the HTTP server
pub async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config)?;

    if config.webhook.url.is_none() {
        tracing::error!("NOTIFY_WEBHOOK_URL is not set, timeout notifications will not be sent");
    }
    let notifier = Arc::new(WebhookNotifier::new(config.webhook.clone(), config.tz)?);

    let checker = Arc::new(TimeoutChecker::new(
        Arc::clone(&store),
        notifier,
        config.alert_timeout,
        config.tz,
    ));

    // Initialize app state
    let state = Arc::new(AppState::new(Arc::clone(&checker), config.tz)?);

    // Start background workers
    let sweep_worker = Arc::new(SweepWorker::new(
        Arc::clone(&checker),
        config.check_interval,
    ));
    let sweep_handle = Arc::clone(&sweep_worker).start();

    let reaper = Arc::new(RetentionReaper::new(
        Arc::clone(&store),
        config.retention.clone(),
        config.tz,
    ));
    let reaper_handle = Arc::clone(&reaper).start();

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting alertwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_worker, reaper))
        .await?;

    // Both workers may be parked in a long sleep
    sweep_handle.abort();
    reaper_handle.abort();

    tracing::info!("alertwatch server stopped");
    Ok(())
}

async fn shutdown_signal(sweep_worker: Arc<SweepWorker>, reaper: Arc<RetentionReaper>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");

    tracing::info!("Shutdown signal received, stopping workers...");
    sweep_worker.stop();
    reaper.stop();
}
