//! REST client for the `/sdapi/v1` endpoints.
//!
//! Generation calls can take minutes, so the client is built with a
//! long per-request timeout that is independent of any WebSocket or
//! remote-call deadline.

use std::time::Duration;

use async_trait::async_trait;
use easel_core::backend::{
    BackendHealth, GenerationBackend, ImageBatch, ModelInfo, SamplerInfo, SchedulerInfo,
    UpscalerInfo,
};
use easel_core::error::CoreError;
use easel_core::params::{GenerationParams, UpscaleRequest};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Local WebUI default.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7860";

/// Per-request timeout for backend calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Version label reported by a healthy backend.
const BACKEND_VERSION: &str = "Auto1111";

/// HTTP client for a single WebUI instance.
pub struct SdApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the backend REST layer.
#[derive(Debug, thiserror::Error)]
pub enum SdApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl From<SdApiError> for CoreError {
    fn from(err: SdApiError) -> Self {
        CoreError::Backend(err.to_string())
    }
}

impl SdApi {
    /// Create a client for `base_url` with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SdApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /sdapi/v1/txt2img`.
    pub async fn txt2img(&self, params: &GenerationParams) -> Result<ImageBatch, SdApiError> {
        self.post_json("txt2img", &params.to_txt2img_payload()).await
    }

    /// `POST /sdapi/v1/img2img`.
    pub async fn img2img(&self, body: &Value) -> Result<ImageBatch, SdApiError> {
        self.post_json("img2img", body).await
    }

    /// Select the active checkpoint via `POST /sdapi/v1/options`.
    pub async fn set_model(&self, model: &str) -> Result<(), SdApiError> {
        let response = self
            .client
            .post(self.endpoint("options"))
            .json(&json!({ "sd_model_checkpoint": model }))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `GET /sdapi/v1/sd-models`.
    pub async fn models(&self) -> Result<Vec<ModelInfo>, SdApiError> {
        self.get_json("sd-models").await
    }

    /// `GET /sdapi/v1/samplers`.
    pub async fn samplers(&self) -> Result<Vec<SamplerInfo>, SdApiError> {
        self.get_json("samplers").await
    }

    /// `GET /sdapi/v1/upscalers`.
    pub async fn upscalers(&self) -> Result<Vec<UpscalerInfo>, SdApiError> {
        self.get_json("upscalers").await
    }

    /// `GET /sdapi/v1/schedulers`.
    pub async fn schedulers(&self) -> Result<Vec<SchedulerInfo>, SdApiError> {
        self.get_json("schedulers").await
    }

    /// `GET /sdapi/v1/latent-upscale-modes`.
    pub async fn latent_upscale_modes(&self) -> Result<Value, SdApiError> {
        self.get_json("latent-upscale-modes").await
    }

    /// `GET /sdapi/v1/memory`.
    pub async fn memory(&self) -> Result<Value, SdApiError> {
        self.get_json("memory").await
    }

    /// `GET /sdapi/v1/progress`.
    pub async fn progress(&self) -> Result<Value, SdApiError> {
        self.get_json("progress?skip_current_image=false").await
    }

    /// Probe memory and progress. Any failure yields an unavailable
    /// report instead of an error.
    pub async fn check_health(&self) -> BackendHealth {
        let memory = self.memory().await;
        let progress = self.progress().await;

        match (memory, progress) {
            (Ok(memory), Ok(progress)) => BackendHealth {
                ok: true,
                version: Some(BACKEND_VERSION.to_string()),
                message: None,
                memory: Some(memory),
                progress: Some(progress),
            },
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(base_url = %self.base_url, error = %e, "Backend health check failed");
                BackendHealth::unavailable()
            }
        }
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> String {
        format!("{}/sdapi/v1/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SdApiError> {
        let response = self.client.get(self.endpoint(path)).send().await?;
        Self::parse_response(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, SdApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`SdApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SdApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SdApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SdApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), SdApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationBackend for SdApi {
    async fn select_model(&self, model: &str) -> Result<(), CoreError> {
        tracing::info!(model, "Selecting backend model");
        Ok(self.set_model(model).await?)
    }

    async fn generate(&self, params: &GenerationParams) -> Result<ImageBatch, CoreError> {
        Ok(self.txt2img(params).await?)
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ImageBatch, CoreError> {
        Ok(self.img2img(&request.to_img2img_payload()).await?)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, CoreError> {
        Ok(self.models().await?)
    }

    async fn list_samplers(&self) -> Result<Vec<SamplerInfo>, CoreError> {
        Ok(self.samplers().await?)
    }

    async fn list_upscalers(&self) -> Result<Vec<UpscalerInfo>, CoreError> {
        Ok(self.upscalers().await?)
    }

    async fn list_schedulers(&self) -> Result<Vec<SchedulerInfo>, CoreError> {
        Ok(self.schedulers().await?)
    }

    async fn health_check(&self) -> BackendHealth {
        self.check_health().await
    }
}
