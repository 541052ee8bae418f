//! Config handlers: the persisted store and the continuous-run lifecycle.

use async_trait::async_trait;
use easel_core::error::CoreError;
use easel_core::params::{GenerationConfig, GenerationParams};
use serde_json::{json, Value};
use tracing::instrument;

use crate::engine::broadcast::{self, ConfigAction};
use crate::rpc::handlers::{parse_param, require_param, require_string_param, to_value};
use crate::rpc::registry::MessageHandler;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Continuous runs
// ---------------------------------------------------------------------------

/// Start continuous generation for a stored config (`{configId}`) or an
/// inline one (`{config}`).
pub struct StartConfigHandler;

#[async_trait]
impl MessageHandler for StartConfigHandler {
    #[instrument(skip(self, data, state), fields(kind = "startConfig"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let config = match data.get("config").filter(|c| !c.is_null()) {
            Some(inline) => parse_param::<GenerationConfig>(inline, "config")?,
            None => {
                let id = require_string_param(&data, "configId")?;
                state.configs.get(id).await?
            }
        };

        let continuous = state.scheduler.start_config(config).await?;
        to_value(&continuous)
    }
}

pub struct StopConfigHandler;

#[async_trait]
impl MessageHandler for StopConfigHandler {
    #[instrument(skip(self, data, state), fields(kind = "stopConfig"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let id = require_string_param(&data, "configId")?;
        let continuous = state.scheduler.stop_config(id).await?;
        to_value(&continuous)
    }
}

pub struct RemoveConfigHandler;

#[async_trait]
impl MessageHandler for RemoveConfigHandler {
    #[instrument(skip(self, data, state), fields(kind = "removeConfig"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let id = require_string_param(&data, "configId")?;
        let removed = state.scheduler.remove_config(id).await?;
        Ok(json!({ "configId": removed.id }))
    }
}

// ---------------------------------------------------------------------------
// Store CRUD
// ---------------------------------------------------------------------------

pub struct GetConfigsHandler;

#[async_trait]
impl MessageHandler for GetConfigsHandler {
    async fn handle(&self, _data: Value, state: &AppState) -> Result<Value, CoreError> {
        to_value(&state.configs.list().await)
    }
}

/// Add a config. Accepts the config itself or `{config}`.
pub struct AddConfigHandler;

#[async_trait]
impl MessageHandler for AddConfigHandler {
    #[instrument(skip(self, data, state), fields(kind = "addConfig"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let body = data.get("config").filter(|c| c.is_object()).unwrap_or(&data);
        let config: GenerationConfig = parse_param(body, "config")?;

        let stored = state.configs.add(config).await?;
        state
            .broadcaster
            .broadcast(broadcast::config_stored(ConfigAction::Added, &stored))
            .await;
        to_value(&stored)
    }
}

pub struct UpdateConfigHandler;

#[async_trait]
impl MessageHandler for UpdateConfigHandler {
    #[instrument(skip(self, data, state), fields(kind = "updateConfig"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let id = require_string_param(&data, "id")?;
        let config: GenerationConfig = parse_param(require_param(&data, "config")?, "config")?;

        let stored = state.configs.update(id, config).await?;
        state
            .broadcaster
            .broadcast(broadcast::config_stored(ConfigAction::Updated, &stored))
            .await;
        to_value(&stored)
    }
}

/// Delete a stored config, also ending any continuous run it drives.
pub struct DeleteConfigHandler;

#[async_trait]
impl MessageHandler for DeleteConfigHandler {
    #[instrument(skip(self, data, state), fields(kind = "deleteConfig"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let id = require_string_param(&data, "id")?;
        let removed = state.configs.delete(id).await?;

        if state.scheduler.config(id).await.is_some() {
            state.scheduler.remove_config(id).await?;
        }

        state
            .broadcaster
            .broadcast(broadcast::config_stored(ConfigAction::Deleted, &removed))
            .await;
        to_value(&removed)
    }
}

pub struct GetDefaultConfigHandler;

#[async_trait]
impl MessageHandler for GetDefaultConfigHandler {
    async fn handle(&self, _data: Value, _state: &AppState) -> Result<Value, CoreError> {
        to_value(&GenerationParams::default())
    }
}
