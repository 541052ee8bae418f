//! `easel-watch`: connect to a server and print its broadcasts as JSON
//! lines until interrupted.

use easel_client::{ClientConfig, ConnectionManager, ConnectionState};
use easel_core::protocol::{BROADCAST_TYPES, CALL_GET_SERVER_STATUS, MSG_TYPE_SERVER_STATUS};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from_env();
    let kinds = watched_types();
    tracing::info!(url = %config.url, kinds = ?kinds, "Watching server");

    let manager = ConnectionManager::new(config);
    for kind in &kinds {
        manager
            .subscribe(kind, |envelope| {
                let line = json!({ "type": envelope.kind, "data": envelope.data });
                println!("{line}");
            })
            .await;
    }

    manager
        .connect()
        .await
        .expect("Failed to connect to server");

    match manager.call(CALL_GET_SERVER_STATUS, json!({})).await {
        Ok(status) => println!("{}", json!({ "type": MSG_TYPE_SERVER_STATUS, "data": status })),
        Err(e) => tracing::warn!(error = %e, "Initial status call failed"),
    }

    let mut states = manager.state_changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(?state, "Connection state");
                if let ConnectionState::Failed { attempts } = state {
                    tracing::error!(attempts, "Server unreachable, exiting");
                    break;
                }
            }
        }
    }

    manager.close().await;
}

/// Types from `EASEL_WATCH_TYPES` (comma-separated), or every broadcast
/// type.
fn watched_types() -> Vec<String> {
    match std::env::var("EASEL_WATCH_TYPES") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => BROADCAST_TYPES.iter().map(|s| s.to_string()).collect(),
    }
}
