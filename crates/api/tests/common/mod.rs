//! Shared fixtures for the API integration tests: a scripted generation
//! backend, a recording broadcaster, PNG helpers and state builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use easel_api::config::ServerConfig;
use easel_api::engine::Broadcaster;
use easel_api::state::AppState;
use easel_api::storage::{ConfigStore, ImageStore};
use easel_api::ws::WsManager;
use easel_core::backend::{
    BackendHealth, GenerationBackend, ImageBatch, ModelInfo, SamplerInfo, SchedulerInfo,
    UpscalerInfo,
};
use easel_core::error::CoreError;
use easel_core::params::{GenerationParams, UpscaleRequest};
use easel_core::protocol::Envelope;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, Semaphore};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// A tiny valid PNG, optionally carrying a `parameters` text chunk.
pub fn png_bytes(parameters: Option<&str>) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(Cursor::new(&mut out), 2, 2);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        if let Some(text) = parameters {
            encoder
                .add_text_chunk("parameters".to_string(), text.to_string())
                .unwrap();
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0u8; 12]).unwrap();
    }
    out
}

pub fn png_base64(parameters: Option<&str>) -> String {
    STANDARD.encode(png_bytes(parameters))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Prompt that makes [`FakeBackend::generate`] panic.
pub const PANIC_PROMPT: &str = "boom";

/// Scripted in-memory backend.
///
/// `generate` returns queued outcomes first, then `images_per_call` fresh
/// PNGs. When built with [`FakeBackend::gated`], `generate` and `upscale`
/// block until [`FakeBackend::release`] is called. When built with
/// [`FakeBackend::gated_model_switch`], `select_model` blocks until
/// [`FakeBackend::release_model_switch`].
pub struct FakeBackend {
    pub calls: Mutex<Vec<String>>,
    pub upscale_requests: Mutex<Vec<UpscaleRequest>>,
    scripted: Mutex<VecDeque<Result<ImageBatch, CoreError>>>,
    images_per_call: usize,
    gate: Option<Semaphore>,
    pub entered: Notify,
    model_gate: Option<Semaphore>,
    pub switching: Notify,
    healthy: AtomicBool,
}

impl FakeBackend {
    pub fn new(images_per_call: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            upscale_requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            images_per_call,
            gate: None,
            entered: Notify::new(),
            model_gate: None,
            switching: Notify::new(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn gated(images_per_call: usize) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(images_per_call)
        }
    }

    pub fn gated_model_switch(images_per_call: usize) -> Self {
        Self {
            model_gate: Some(Semaphore::new(0)),
            ..Self::new(images_per_call)
        }
    }

    pub fn release_model_switch(&self) {
        if let Some(gate) = &self.model_gate {
            gate.add_permits(1);
        }
    }

    /// Let one blocked backend call proceed.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub async fn push_result(&self, result: Result<ImageBatch, CoreError>) {
        self.scripted.lock().await.push_back(result);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn wait_gate(&self) {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    fn batch(&self) -> ImageBatch {
        ImageBatch {
            images: (0..self.images_per_call).map(|_| png_base64(None)).collect(),
            info: None,
        }
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn select_model(&self, model: &str) -> Result<(), CoreError> {
        self.calls.lock().await.push(format!("select_model:{model}"));
        self.switching.notify_one();
        if let Some(gate) = &self.model_gate {
            gate.acquire().await.unwrap().forget();
        }
        if model == "missing" {
            return Err(CoreError::Backend("model not found".into()));
        }
        Ok(())
    }

    async fn generate(&self, params: &GenerationParams) -> Result<ImageBatch, CoreError> {
        self.calls
            .lock()
            .await
            .push(format!("generate:{}", params.prompt));
        if params.prompt == PANIC_PROMPT {
            panic!("backend blew up");
        }
        self.wait_gate().await;
        match self.scripted.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(self.batch()),
        }
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ImageBatch, CoreError> {
        self.calls.lock().await.push("upscale".to_string());
        self.upscale_requests.lock().await.push(request.clone());
        self.wait_gate().await;
        Ok(ImageBatch {
            images: vec![png_base64(None)],
            info: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, CoreError> {
        Ok(vec![ModelInfo {
            title: "sdxl.safetensors [abc]".into(),
            model_name: "sdxl".into(),
            hash: Some("abc".into()),
            filename: None,
        }])
    }

    async fn list_samplers(&self) -> Result<Vec<SamplerInfo>, CoreError> {
        Ok(vec![SamplerInfo {
            name: "Euler a".into(),
            aliases: vec![],
        }])
    }

    async fn list_upscalers(&self) -> Result<Vec<UpscalerInfo>, CoreError> {
        Ok(vec![])
    }

    async fn list_schedulers(&self) -> Result<Vec<SchedulerInfo>, CoreError> {
        Ok(vec![])
    }

    async fn health_check(&self) -> BackendHealth {
        if self.healthy.load(Ordering::SeqCst) {
            BackendHealth {
                ok: true,
                version: Some("fake".into()),
                message: None,
                memory: None,
                progress: None,
            }
        } else {
            BackendHealth::unavailable()
        }
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingBroadcaster {
    pub sent: Mutex<Vec<Envelope>>,
}

impl RecordingBroadcaster {
    pub async fn of_type(&self, kind: &str) -> Vec<Envelope> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn kinds(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|e| e.kind.clone()).collect()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, envelope: Envelope) {
        self.sent.lock().await.push(envelope);
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

pub fn test_config(root: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        output_dir: root.join("output"),
        config_file: root.join("data/generation-configs.json"),
        handler_timeout_secs: 5,
        ..ServerConfig::default()
    }
}

/// Everything a test needs to poke at the server from the inside.
pub struct TestHarness {
    pub state: AppState,
    pub backend: Arc<FakeBackend>,
    pub recorder: Arc<RecordingBroadcaster>,
    pub dir: tempfile::TempDir,
}

/// State whose broadcasts are recorded instead of sent.
pub async fn harness(backend: FakeBackend) -> TestHarness {
    let recorder = Arc::new(RecordingBroadcaster::default());
    build(backend, Arc::clone(&recorder) as Arc<dyn Broadcaster>, Some(recorder)).await
}

/// State whose broadcasts go to real WebSocket connections.
pub async fn live_harness(backend: FakeBackend) -> (TestHarness, Arc<WsManager>) {
    let ws_manager = Arc::new(WsManager::new());
    let broadcaster: Arc<dyn Broadcaster> = ws_manager.clone();
    let mut h = build(backend, broadcaster, None).await;
    h.state.ws_manager = Arc::clone(&ws_manager);
    (h, ws_manager)
}

async fn build(
    backend: FakeBackend,
    broadcaster: Arc<dyn Broadcaster>,
    recorder: Option<Arc<RecordingBroadcaster>>,
) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let images = Arc::new(ImageStore::new(&config.output_dir));
    images.init().await.unwrap();
    let configs = Arc::new(ConfigStore::load(&config.config_file).await.unwrap());
    let backend = Arc::new(backend);

    let state = AppState::assemble(
        config,
        Arc::new(WsManager::new()),
        broadcaster,
        Arc::clone(&backend) as Arc<dyn GenerationBackend>,
        configs,
        images,
    );

    TestHarness {
        state,
        backend,
        recorder: recorder.unwrap_or_default(),
        dir,
    }
}

/// Serve the full router on a loopback port; returns the `ws://` URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
