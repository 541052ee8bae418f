//! Tick-driven job scheduler.
//!
//! A single long-lived task wakes every [`TICK_INTERVAL`] and runs at most
//! one unit of work against the generation backend. Handlers never touch
//! the registry directly; they go through the mutation points on
//! [`Scheduler`], which broadcast every transition.
//!
//! The registry lock is held only for bookkeeping. Backend calls run with
//! the lock released so submissions keep flowing while the GPU is busy;
//! the run loop itself is sequential, which together with the registry's
//! in-flight slot keeps backend work single-flight.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use easel_core::backend::GenerationBackend;
use easel_core::error::CoreError;
use easel_core::job::{ConfigStatus, ContinuousConfig, Job, QueueSnapshot};
use easel_core::params::{GenerationConfig, GenerationParams, UpscaleRequest, UpscaleSettings};
use easel_core::scheduling::{drop_preview_grid, DEFAULT_RETENTION, TICK_INTERVAL};
use easel_core::types::JobId;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::broadcast::{self, Broadcaster, ConfigAction};
use crate::engine::registry::{Evicted, Item, Registry, Started, Unit, Work};
use crate::storage::ImageStore;

/// Artifact directory for upscaled images.
const UPSCALE_OUTPUT_NAME: &str = "upscaled";

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    registry: Mutex<Registry>,
    backend: Arc<dyn GenerationBackend>,
    images: Arc<ImageStore>,
    broadcaster: Arc<dyn Broadcaster>,
    tick_interval: Duration,
    retention: Duration,
    runner: Mutex<Option<Runner>>,
}

impl Scheduler {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        images: Arc<ImageStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            backend,
            images,
            broadcaster,
            tick_interval: TICK_INTERVAL,
            retention: DEFAULT_RETENTION,
            runner: Mutex::new(None),
        }
    }

    /// Override how long finished jobs and stopped configs are kept.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the run loop. Calling this while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { scheduler.run(token).await });
        *runner = Some(Runner { cancel, handle });
    }

    /// Stop the run loop and wait for the current unit to finish.
    /// Calling this while stopped is a no-op.
    pub async fn stop(&self) {
        let Some(runner) = self.runner.lock().await.take() else {
            return;
        };
        runner.cancel.cancel();
        if let Err(e) = runner.handle.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Run the tick loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            retention_secs = self.retention.as_secs(),
            "Scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One scheduling cycle: evict expired items, then run at most one
    /// unit of work. Returns whether a unit ran.
    pub async fn tick(&self) -> bool {
        let started = {
            let mut registry = self.registry.lock().await;
            let evicted = registry.evict_expired(Utc::now(), self.retention);
            self.announce_evictions(&registry, evicted).await;

            let Some(started) = registry.begin_next(Utc::now()) else {
                return false;
            };
            self.announce(&started.item).await;
            self.broadcaster
                .broadcast(broadcast::queue_update(&registry.snapshot()))
                .await;
            started
        };

        let Started { unit, work, .. } = started;
        let outcome = match AssertUnwindSafe(self.execute(&unit, work))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::Internal("Unit of work panicked".into())),
        };
        if let Err(e) = &outcome {
            match &unit {
                Unit::Job(id) => tracing::error!(job_id = %id, error = %e, "Job failed"),
                Unit::Config(id) => {
                    tracing::error!(config_id = %id, error = %e, "Continuous run failed")
                }
            }
        }

        let mut registry = self.registry.lock().await;
        if let Some(item) = registry.finish(outcome.map_err(|e| e.to_string()), Utc::now()) {
            self.announce(&item).await;
        }
        self.broadcaster
            .broadcast(broadcast::queue_update(&registry.snapshot()))
            .await;
        true
    }

    // -----------------------------------------------------------------------
    // Mutation points
    // -----------------------------------------------------------------------

    pub async fn submit_generation(&self, config: GenerationConfig) -> Result<Job, CoreError> {
        let mut registry = self.registry.lock().await;
        let job = registry.submit_generation(config, Utc::now())?;
        tracing::info!(job_id = %job.id, name = %job.name(), "Generation job queued");
        self.publish_job(&registry, &job).await;
        Ok(job)
    }

    pub async fn submit_upscale(&self, image_path: String, settings: UpscaleSettings) -> Job {
        let mut registry = self.registry.lock().await;
        let job = registry.submit_upscale(image_path, settings, Utc::now());
        tracing::info!(job_id = %job.id, "Upscale job queued");
        self.publish_job(&registry, &job).await;
        job
    }

    pub async fn cancel(&self, id: JobId) -> Result<Job, CoreError> {
        let mut registry = self.registry.lock().await;
        let job = registry.cancel(id)?;
        tracing::info!(job_id = %id, status = ?job.status, "Job removed");
        self.broadcaster
            .broadcast(broadcast::job_removed(job.id, job.kind))
            .await;
        self.broadcaster
            .broadcast(broadcast::queue_update(&registry.snapshot()))
            .await;
        Ok(job)
    }

    pub async fn start_config(&self, config: GenerationConfig) -> Result<ContinuousConfig, CoreError> {
        let mut registry = self.registry.lock().await;
        let continuous = registry.start_config(config)?;
        tracing::info!(config_id = %continuous.id, status = ?continuous.status, "Continuous config started");
        self.publish_config(&registry, ConfigAction::Started, &continuous)
            .await;
        Ok(continuous)
    }

    pub async fn stop_config(&self, id: &str) -> Result<ContinuousConfig, CoreError> {
        let mut registry = self.registry.lock().await;
        let continuous = registry.stop_config(id, Utc::now())?;
        tracing::info!(config_id = %id, "Continuous config stopped");
        self.publish_config(&registry, ConfigAction::Stopped, &continuous)
            .await;
        Ok(continuous)
    }

    pub async fn remove_config(&self, id: &str) -> Result<ContinuousConfig, CoreError> {
        let mut registry = self.registry.lock().await;
        let removed = registry.remove_config(id)?;
        tracing::info!(config_id = %id, "Continuous config removed");
        self.broadcaster
            .broadcast(broadcast::config_removed(&removed.id))
            .await;
        self.broadcaster
            .broadcast(broadcast::queue_update(&registry.snapshot()))
            .await;
        Ok(removed)
    }

    /// Switch the backend's checkpoint between units of work.
    ///
    /// The registry lock is held across the backend call so no tick can
    /// begin a unit while the switch is in progress.
    pub async fn select_model(&self, model: &str) -> Result<(), CoreError> {
        let registry = self.registry.lock().await;
        if registry.is_processing() {
            return Err(CoreError::InvalidState(
                "Cannot change model while a job is processing".into(),
            ));
        }
        self.backend.select_model(model).await?;
        tracing::info!(model, "Model selected");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.registry.lock().await.snapshot()
    }

    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.registry.lock().await.job(id).cloned()
    }

    pub async fn config(&self, id: &str) -> Option<ContinuousConfig> {
        self.registry.lock().await.config(id).cloned()
    }

    /// Whether a unit of work is currently running on the backend.
    pub async fn is_processing(&self) -> bool {
        self.registry.lock().await.is_processing()
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn execute(&self, unit: &Unit, work: Work) -> Result<Vec<String>, CoreError> {
        match work {
            Work::Generation { name, params } => {
                tracing::info!(unit = ?unit, name = %name, "Running generation");
                self.run_generation(&name, &params).await
            }
            Work::Upscale {
                image_path,
                settings,
            } => {
                tracing::info!(unit = ?unit, image_path = %image_path, "Running upscale");
                self.run_upscale(&image_path, settings).await
            }
        }
    }

    async fn run_generation(
        &self,
        name: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, CoreError> {
        if let Some(model) = params.target_model() {
            self.backend.select_model(model).await?;
        }

        let batch = self.backend.generate(params).await?;
        let images = drop_preview_grid(batch.images, params.requested_images());
        self.images.save_all(name, &images).await
    }

    async fn run_upscale(
        &self,
        image_path: &str,
        settings: UpscaleSettings,
    ) -> Result<Vec<String>, CoreError> {
        let metadata = self.images.read_metadata(image_path).await;
        let init_image = self.images.load_base64(image_path).await?;

        let request = UpscaleRequest {
            init_image,
            prompt: metadata.prompt,
            negative_prompt: metadata.negative_prompt,
            settings,
        };
        let batch = self.backend.upscale(&request).await?;
        self.images.save_all(UPSCALE_OUTPUT_NAME, &batch.images).await
    }

    // -----------------------------------------------------------------------
    // Broadcast helpers (called with the registry lock held)
    // -----------------------------------------------------------------------

    async fn announce(&self, item: &Item) {
        let envelope = match item {
            Item::Job(job) => broadcast::job_update(job),
            Item::Config(config) => {
                let action = match config.status {
                    ConfigStatus::Processing => ConfigAction::Running,
                    _ => ConfigAction::Finished,
                };
                broadcast::config_status(action, config)
            }
            Item::RemovedConfig(id) => {
                tracing::debug!(config_id = %id, "Run finished for removed config");
                return;
            }
        };
        self.broadcaster.broadcast(envelope).await;
    }

    async fn announce_evictions(&self, registry: &Registry, evicted: Evicted) {
        if evicted.is_empty() {
            return;
        }
        for job in &evicted.jobs {
            tracing::debug!(job_id = %job.id, "Evicted finished job");
            self.broadcaster
                .broadcast(broadcast::job_removed(job.id, job.kind))
                .await;
        }
        for config in &evicted.configs {
            tracing::debug!(config_id = %config.id, "Evicted stopped config");
            self.broadcaster
                .broadcast(broadcast::config_removed(&config.id))
                .await;
        }
        self.broadcaster
            .broadcast(broadcast::queue_update(&registry.snapshot()))
            .await;
    }

    async fn publish_job(&self, registry: &Registry, job: &Job) {
        self.broadcaster.broadcast(broadcast::job_update(job)).await;
        self.broadcaster
            .broadcast(broadcast::queue_update(&registry.snapshot()))
            .await;
    }

    async fn publish_config(&self, registry: &Registry, action: ConfigAction, config: &ContinuousConfig) {
        self.broadcaster
            .broadcast(broadcast::config_status(action, config))
            .await;
        self.broadcaster
            .broadcast(broadcast::queue_update(&registry.snapshot()))
            .await;
    }
}
