//! Catalog queries proxied to the generation backend, and model
//! selection.
//!
//! Listings are read-only and go straight to the backend without waiting
//! for the scheduler. Selecting a model mutates backend state, so it goes
//! through the scheduler and is refused while a unit of work is running.

use async_trait::async_trait;
use easel_core::error::CoreError;
use serde_json::{json, Value};
use tracing::instrument;

use crate::rpc::handlers::{require_string_param, to_value};
use crate::rpc::registry::MessageHandler;
use crate::state::AppState;

pub struct GetModelsHandler;

#[async_trait]
impl MessageHandler for GetModelsHandler {
    async fn handle(&self, _data: Value, state: &AppState) -> Result<Value, CoreError> {
        to_value(&state.backend.list_models().await?)
    }
}

pub struct GetSamplersHandler;

#[async_trait]
impl MessageHandler for GetSamplersHandler {
    async fn handle(&self, _data: Value, state: &AppState) -> Result<Value, CoreError> {
        to_value(&state.backend.list_samplers().await?)
    }
}

pub struct GetUpscalersHandler;

#[async_trait]
impl MessageHandler for GetUpscalersHandler {
    async fn handle(&self, _data: Value, state: &AppState) -> Result<Value, CoreError> {
        to_value(&state.backend.list_upscalers().await?)
    }
}

pub struct GetSchedulersHandler;

#[async_trait]
impl MessageHandler for GetSchedulersHandler {
    async fn handle(&self, _data: Value, state: &AppState) -> Result<Value, CoreError> {
        to_value(&state.backend.list_schedulers().await?)
    }
}

/// Switch the backend's active checkpoint.
pub struct SetModelHandler;

#[async_trait]
impl MessageHandler for SetModelHandler {
    #[instrument(skip(self, data, state), fields(kind = "setModel"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let model = require_string_param(&data, "model")?;
        state.scheduler.select_model(model).await?;
        Ok(json!({ "model": model }))
    }
}
