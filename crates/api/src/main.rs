use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use easel_core::backend::GenerationBackend;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easel_api::config::ServerConfig;
use easel_api::engine::Broadcaster;
use easel_api::router::build_app_router;
use easel_api::state::AppState;
use easel_api::storage::{ConfigStore, ImageStore};
use easel_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();

    // --- Tracing ---
    let (pretty, json) = if config.json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_api=debug,easel_sdapi=debug,tower_http=debug".into()),
        )
        .with(pretty)
        .with(json)
        .init();

    tracing::info!(
        host = %config.host,
        port = %config.port,
        backend_url = %config.backend_url,
        "Loaded server configuration",
    );

    // --- Backend client ---
    let backend: Arc<dyn GenerationBackend> = Arc::new(
        easel_sdapi::SdApi::new(&config.backend_url, config.backend_timeout())
            .expect("Failed to build backend HTTP client"),
    );
    let health = backend.health_check().await;
    if health.ok {
        tracing::info!("Generation backend reachable");
    } else {
        tracing::warn!("Generation backend not reachable yet; jobs will fail until it is");
    }

    // --- Stores ---
    let images = Arc::new(ImageStore::new(&config.output_dir));
    images
        .init()
        .await
        .expect("Failed to create output directory");
    let configs = Arc::new(
        ConfigStore::load(&config.config_file)
            .await
            .expect("Failed to load config store"),
    );

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let broadcaster: Arc<dyn Broadcaster> = ws_manager.clone();

    // --- Heartbeat ---
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), heartbeat_cancel.clone());

    // --- App state + scheduler ---
    let state = AppState::assemble(
        config.clone(),
        Arc::clone(&ws_manager),
        broadcaster,
        backend,
        configs,
        images,
    );
    let scheduler = Arc::clone(&state.scheduler);
    scheduler.start().await;

    // --- Router ---
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Let an in-flight unit finish so its artifacts are not half-written.
    if tokio::time::timeout(config.backend_timeout(), scheduler.stop())
        .await
        .is_err()
    {
        tracing::warn!("Scheduler did not stop in time");
    }
    tracing::info!("Scheduler stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
