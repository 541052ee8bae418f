//! Job handlers: submit, cancel, status.

use async_trait::async_trait;
use easel_core::error::CoreError;
use easel_core::params::{GenerationConfig, UpscaleSettings};
use easel_core::types::JobId;
use serde_json::{json, Value};
use tracing::instrument;

use crate::rpc::handlers::{parse_param, require_param, require_string_param, to_value};
use crate::rpc::registry::MessageHandler;
use crate::state::AppState;

/// Queue a one-shot generation job.
pub struct StartGenerationHandler;

#[async_trait]
impl MessageHandler for StartGenerationHandler {
    #[instrument(skip(self, data, state), fields(kind = "startGeneration"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let config: GenerationConfig = parse_param(require_param(&data, "config")?, "config")?;
        let job = state.scheduler.submit_generation(config).await?;
        to_value(&job)
    }
}

/// Queue an upscale job for a stored artifact.
pub struct QueueUpscaleHandler;

#[async_trait]
impl MessageHandler for QueueUpscaleHandler {
    #[instrument(skip(self, data, state), fields(kind = "queueUpscale"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let image_path = require_string_param(&data, "imagePath")?;
        state.images.resolve(image_path)?;

        let settings = match data.get("config").filter(|c| !c.is_null()) {
            Some(config) => parse_param::<UpscaleSettings>(config, "upscale config")?,
            None => UpscaleSettings::default(),
        };

        let job = state
            .scheduler
            .submit_upscale(image_path.to_string(), settings)
            .await;
        to_value(&job)
    }
}

/// Remove a queued or finished job.
pub struct CancelJobHandler;

#[async_trait]
impl MessageHandler for CancelJobHandler {
    #[instrument(skip(self, data, state), fields(kind = "cancelJob"))]
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError> {
        let raw = require_string_param(&data, "jobId")?;
        let job_id: JobId = raw
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid job id: {raw}")))?;

        state.scheduler.cancel(job_id).await?;
        Ok(json!({ "jobId": job_id }))
    }
}

/// Backend health plus the scheduler snapshot.
pub struct GetServerStatusHandler;

#[async_trait]
impl MessageHandler for GetServerStatusHandler {
    #[instrument(skip(self, _data, state), fields(kind = "getServerStatus"))]
    async fn handle(&self, _data: Value, state: &AppState) -> Result<Value, CoreError> {
        let backend = state.backend.health_check().await;
        let queue = state.scheduler.snapshot().await;
        let status = if backend.ok { "ok" } else { "degraded" };

        Ok(json!({
            "status": status,
            "backend": backend,
            "queue": queue,
        }))
    }
}
