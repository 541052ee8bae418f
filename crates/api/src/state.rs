use std::sync::Arc;

use easel_core::backend::GenerationBackend;

use crate::config::ServerConfig;
use crate::engine::{Broadcaster, Scheduler};
use crate::rpc::{self, HandlerRegistry};
use crate::storage::{ConfigStore, ImageStore};
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via
/// `State<AppState>` and to every message handler.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Open WebSocket connections (replies are routed through it).
    pub ws_manager: Arc<WsManager>,
    /// Fan-out for unsolicited envelopes. In production this is the
    /// `ws_manager` itself.
    pub broadcaster: Arc<dyn Broadcaster>,
    pub scheduler: Arc<Scheduler>,
    pub configs: Arc<ConfigStore>,
    pub images: Arc<ImageStore>,
    pub backend: Arc<dyn GenerationBackend>,
    pub registry: Arc<HandlerRegistry>,
}

impl AppState {
    /// Wire the scheduler and handler registry around the given
    /// collaborators.
    pub fn assemble(
        config: ServerConfig,
        ws_manager: Arc<WsManager>,
        broadcaster: Arc<dyn Broadcaster>,
        backend: Arc<dyn GenerationBackend>,
        configs: Arc<ConfigStore>,
        images: Arc<ImageStore>,
    ) -> Self {
        let scheduler = Scheduler::new(
            Arc::clone(&backend),
            Arc::clone(&images),
            Arc::clone(&broadcaster),
        )
        .with_retention(config.job_retention());
        let registry = rpc::build_registry(config.handler_timeout());

        Self {
            config: Arc::new(config),
            ws_manager,
            broadcaster,
            scheduler: Arc::new(scheduler),
            configs,
            images,
            backend,
            registry: Arc::new(registry),
        }
    }
}
