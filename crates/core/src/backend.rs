//! Capability surface of the external image-generation backend.
//!
//! The scheduler and the remote-call handlers only see this trait; the
//! HTTP implementation lives in `easel-sdapi`, and tests substitute a
//! scripted fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::params::{GenerationParams, UpscaleRequest};

/// Message reported when the backend cannot be reached at all.
pub const BACKEND_UNAVAILABLE: &str = "Auto1111 server not available";

/// Images returned by a generate or upscale call, base64-encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBatch {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub title: String,
    pub model_name: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerInfo {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscalerInfo {
    pub name: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerInfo {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Result of a backend health probe. Never an error: an unreachable
/// backend is reported as `ok == false` with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
}

impl BackendHealth {
    pub fn unavailable() -> Self {
        Self {
            ok: false,
            version: None,
            message: Some(BACKEND_UNAVAILABLE.to_string()),
            memory: None,
            progress: None,
        }
    }
}

/// Operations the server needs from the generation backend.
///
/// Every failure is reported as [`CoreError::Backend`] carrying a
/// human-readable message.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Switch the active checkpoint.
    async fn select_model(&self, model: &str) -> Result<(), CoreError>;

    /// Text-to-image generation.
    async fn generate(&self, params: &GenerationParams) -> Result<ImageBatch, CoreError>;

    /// Upscale one image through the backend's tiled upscale script.
    async fn upscale(&self, request: &UpscaleRequest) -> Result<ImageBatch, CoreError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, CoreError>;

    async fn list_samplers(&self) -> Result<Vec<SamplerInfo>, CoreError>;

    async fn list_upscalers(&self) -> Result<Vec<UpscalerInfo>, CoreError>;

    async fn list_schedulers(&self) -> Result<Vec<SchedulerInfo>, CoreError>;

    async fn health_check(&self) -> BackendHealth;
}
