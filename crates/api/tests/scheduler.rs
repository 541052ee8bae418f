//! Integration tests for the job scheduler against a scripted backend
//! and a real on-disk image store.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{harness, png_bytes, FakeBackend, PANIC_PROMPT};
use easel_core::backend::ImageBatch;
use easel_core::error::CoreError;
use easel_core::job::{ConfigStatus, JobKind, JobStatus};
use easel_core::params::{GenerationConfig, GenerationParams, UpscaleSettings};
use easel_core::protocol::{MSG_TYPE_CONFIG_UPDATE, MSG_TYPE_JOB_REMOVED, MSG_TYPE_JOB_UPDATE};

fn config(id: &str, name: &str, steps: u32) -> GenerationConfig {
    GenerationConfig::new(
        id,
        name,
        GenerationParams {
            prompt: format!("{name} prompt"),
            steps,
            ..Default::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Test: generation run persists artifacts and broadcasts the final job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generation_completes_with_artifacts() {
    let h = harness(FakeBackend::new(2)).await;
    let scheduler = &h.state.scheduler;

    let job = scheduler
        .submit_generation(config("cfg-a", "A", 20))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    assert!(scheduler.tick().await);

    let done = scheduler.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, vec!["A/00000.png", "A/00001.png"]);
    assert_eq!(done.progress, Some(100));
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());

    for path in &done.result {
        assert!(h.state.images.resolve(path).unwrap().exists());
    }

    // The last jobUpdate carries exactly the stored completed snapshot.
    let updates = h.recorder.of_type(MSG_TYPE_JOB_UPDATE).await;
    let last = updates.last().unwrap();
    assert_eq!(last.data, serde_json::to_value(&done).unwrap());

    let statuses: Vec<String> = updates
        .iter()
        .map(|e| e.data["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["queued", "processing", "completed"]);

    assert_eq!(h.backend.calls().await, vec!["generate:A prompt"]);
}

// ---------------------------------------------------------------------------
// Test: the preview grid is dropped when several images were requested
// ---------------------------------------------------------------------------

#[tokio::test]
async fn preview_grid_is_not_persisted() {
    // Three images back for a batch of two: grid + two outputs.
    let h = harness(FakeBackend::new(3)).await;
    let scheduler = &h.state.scheduler;

    let mut cfg = config("cfg-a", "Grid", 20);
    cfg.params.batch_size = 2;
    let job = scheduler.submit_generation(cfg).await.unwrap();
    scheduler.tick().await;

    let done = scheduler.job(job.id).await.unwrap();
    assert_eq!(done.result.len(), 2);
}

// ---------------------------------------------------------------------------
// Test: a named model is selected before generating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_is_selected_first() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    let mut cfg = config("cfg-a", "A", 20);
    cfg.params.model = Some("sdxl.safetensors".into());
    scheduler.submit_generation(cfg).await.unwrap();
    scheduler.tick().await;

    assert_eq!(
        h.backend.calls().await,
        vec!["select_model:sdxl.safetensors", "generate:A prompt"]
    );
}

#[tokio::test]
async fn model_select_failure_fails_the_job_only() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    let mut cfg = config("cfg-a", "A", 20);
    cfg.params.model = Some("missing".into());
    let failing = scheduler.submit_generation(cfg).await.unwrap();
    let next = scheduler
        .submit_generation(config("cfg-b", "B", 20))
        .await
        .unwrap();

    scheduler.tick().await;
    scheduler.tick().await;

    let failed = scheduler.job(failing.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("model not found"));
    assert_eq!(
        scheduler.job(next.id).await.unwrap().status,
        JobStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Test: backend failure is recorded and the scheduler keeps going
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backend_failure_marks_job_failed() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;
    h.backend
        .push_result(Err(CoreError::Backend("out of memory".into())))
        .await;

    let job = scheduler
        .submit_generation(config("cfg-a", "A", 20))
        .await
        .unwrap();
    scheduler.tick().await;

    let failed = scheduler.job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("out of memory"));

    // Next submission still runs.
    let next = scheduler
        .submit_generation(config("cfg-b", "B", 20))
        .await
        .unwrap();
    scheduler.tick().await;
    assert_eq!(
        scheduler.job(next.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn undecodable_images_fail_the_job() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;
    h.backend
        .push_result(Ok(ImageBatch {
            images: vec!["not base64!".into()],
            info: None,
        }))
        .await;

    let job = scheduler
        .submit_generation(config("cfg-a", "A", 20))
        .await
        .unwrap();
    scheduler.tick().await;

    assert_eq!(
        scheduler.job(job.id).await.unwrap().status,
        JobStatus::Failed
    );
}

// ---------------------------------------------------------------------------
// Test: a unit that panics fails alone and frees the slot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_unit_fails_and_scheduler_moves_on() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    let mut huge = config("cfg-h", "Huge", 20);
    huge.params.batch_size = u32::MAX;
    huge.params.n_iter = 2;
    let huge = scheduler.submit_generation(huge).await.unwrap();

    let mut doomed = config("cfg-p", "Doomed", 20);
    doomed.params.prompt = PANIC_PROMPT.to_string();
    let doomed = scheduler.submit_generation(doomed).await.unwrap();

    let next = scheduler
        .submit_generation(config("cfg-b", "B", 20))
        .await
        .unwrap();

    assert!(scheduler.tick().await);
    assert!(scheduler.tick().await);
    assert!(scheduler.tick().await);

    let huge = scheduler.job(huge.id).await.unwrap();
    assert_eq!(huge.status, JobStatus::Completed);
    assert_eq!(huge.result.len(), 1);

    let doomed = scheduler.job(doomed.id).await.unwrap();
    assert_eq!(doomed.status, JobStatus::Failed);
    assert!(doomed.error.unwrap().contains("panicked"));

    let next = scheduler.job(next.id).await.unwrap();
    assert_eq!(next.status, JobStatus::Completed);
    assert!(!scheduler.is_processing().await);
}

// ---------------------------------------------------------------------------
// Test: upscale is dequeued before a queued generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upscale_preempts_queued_generation() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    // Source image with embedded prompts.
    let dir = h.state.images.ensure_named_directory("A").await.unwrap();
    std::fs::write(
        dir.join("00000.png"),
        png_bytes(Some("castle\nNegative prompt: blurry\nSteps: 20")),
    )
    .unwrap();

    let generation = scheduler
        .submit_generation(config("cfg-b", "B", 20))
        .await
        .unwrap();
    let upscale = scheduler
        .submit_upscale("A/00000.png".into(), UpscaleSettings::default())
        .await;

    scheduler.tick().await;

    assert_eq!(
        scheduler.job(upscale.id).await.unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(
        scheduler.job(generation.id).await.unwrap().status,
        JobStatus::Queued
    );

    let requests = h.backend.upscale_requests.lock().await.clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "castle");
    assert_eq!(requests[0].negative_prompt, "blurry");
    assert!(!requests[0].init_image.is_empty());

    let done = scheduler.job(upscale.id).await.unwrap();
    assert_eq!(done.result, vec!["upscaled/00000.png"]);
}

#[tokio::test]
async fn upscale_of_missing_image_fails() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    let job = scheduler
        .submit_upscale("A/00042.png".into(), UpscaleSettings::default())
        .await;
    scheduler.tick().await;

    let failed = scheduler.job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(h.backend.calls().await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: cancel semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_queued_job_broadcasts_removal() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    let job = scheduler
        .submit_upscale("A/00000.png".into(), UpscaleSettings::default())
        .await;
    scheduler.cancel(job.id).await.unwrap();

    assert!(scheduler.job(job.id).await.is_none());
    let snapshot = scheduler.snapshot().await;
    assert!(snapshot.jobs.iter().all(|j| j.id != job.id));
    assert_eq!(snapshot.upscale_queue_length, 0);

    let removed = h.recorder.of_type(MSG_TYPE_JOB_REMOVED).await;
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].data["jobId"], job.id.to_string());
    assert_eq!(removed[0].data["kind"], serde_json::json!(JobKind::Upscale));

    assert!(!scheduler.tick().await);
}

#[tokio::test]
async fn cancel_processing_job_is_rejected() {
    let h = harness(FakeBackend::gated(1)).await;
    let scheduler = Arc::clone(&h.state.scheduler);

    let job = scheduler
        .submit_generation(config("cfg-a", "A", 20))
        .await
        .unwrap();

    let ticking = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.tick().await })
    };
    h.backend.entered.notified().await;

    assert!(scheduler.is_processing().await);
    assert_matches!(scheduler.cancel(job.id).await, Err(CoreError::InvalidState(_)));
    assert_eq!(
        scheduler.job(job.id).await.unwrap().status,
        JobStatus::Processing
    );

    h.backend.release();
    assert!(ticking.await.unwrap());
    assert_eq!(
        scheduler.job(job.id).await.unwrap().status,
        JobStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Test: submissions are accepted while the backend is busy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submissions_flow_while_processing() {
    let h = harness(FakeBackend::gated(1)).await;
    let scheduler = Arc::clone(&h.state.scheduler);

    scheduler
        .submit_generation(config("cfg-a", "A", 20))
        .await
        .unwrap();
    let ticking = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.tick().await })
    };
    h.backend.entered.notified().await;

    let queued = scheduler
        .submit_generation(config("cfg-b", "B", 20))
        .await
        .unwrap();
    // A second tick while busy does nothing.
    assert!(!scheduler.tick().await);
    assert_eq!(
        scheduler.job(queued.id).await.unwrap().status,
        JobStatus::Queued
    );

    h.backend.release();
    ticking.await.unwrap();
    h.backend.release();
    assert!(scheduler.tick().await);
    assert_eq!(
        scheduler.job(queued.id).await.unwrap().status,
        JobStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Test: continuous configs rotate and keep running after failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn continuous_configs_round_robin() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;

    scheduler.start_config(config("c1", "One", 20)).await.unwrap();
    scheduler.start_config(config("c2", "Two", 20)).await.unwrap();

    for _ in 0..4 {
        assert!(scheduler.tick().await);
    }

    assert_eq!(
        h.backend.calls().await,
        vec![
            "generate:One prompt",
            "generate:Two prompt",
            "generate:One prompt",
            "generate:Two prompt",
        ]
    );
    let one = scheduler.config("c1").await.unwrap();
    assert_eq!(one.completed_runs, 2);
    assert_eq!(one.status, ConfigStatus::Active);
    assert_eq!(one.last_artifacts, vec!["One/00001.png"]);
}

#[tokio::test]
async fn failed_continuous_run_stays_active() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = &h.state.scheduler;
    h.backend
        .push_result(Err(CoreError::Backend("out of memory".into())))
        .await;

    scheduler.start_config(config("c1", "One", 20)).await.unwrap();
    scheduler.tick().await;

    let one = scheduler.config("c1").await.unwrap();
    assert_eq!(one.status, ConfigStatus::Active);
    assert_eq!(one.failed_runs, 1);
    assert_eq!(one.last_error.as_deref(), Some("out of memory"));

    scheduler.tick().await;
    let one = scheduler.config("c1").await.unwrap();
    assert_eq!(one.completed_runs, 1);
    assert!(one.last_error.is_none());
}

#[tokio::test]
async fn stop_racing_a_run_skips_reentry() {
    let h = harness(FakeBackend::gated(1)).await;
    let scheduler = Arc::clone(&h.state.scheduler);

    scheduler.start_config(config("c1", "One", 20)).await.unwrap();
    let ticking = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.tick().await })
    };
    h.backend.entered.notified().await;

    let stopped = scheduler.stop_config("c1").await.unwrap();
    assert_eq!(stopped.status, ConfigStatus::Stopped);

    h.backend.release();
    ticking.await.unwrap();

    let one = scheduler.config("c1").await.unwrap();
    assert_eq!(one.status, ConfigStatus::Stopped);
    assert_eq!(one.completed_runs, 1);
    assert!(!scheduler.tick().await);

    let updates = h.recorder.of_type(MSG_TYPE_CONFIG_UPDATE).await;
    let actions: Vec<&str> = updates
        .iter()
        .map(|e| e.data["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["started", "running", "stopped", "finished"]);
}

#[tokio::test]
async fn remove_unknown_config_is_not_found() {
    let h = harness(FakeBackend::new(1)).await;
    assert_matches!(
        h.state.scheduler.remove_config("nope").await,
        Err(CoreError::NotFound { .. })
    );
    assert_matches!(
        h.state.scheduler.stop_config("nope").await,
        Err(CoreError::NotFound { .. })
    );
}

// ---------------------------------------------------------------------------
// Test: start/stop of the run loop is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_start_stop_idempotent() {
    let h = harness(FakeBackend::new(1)).await;
    let scheduler = Arc::clone(&h.state.scheduler);

    scheduler.start().await;
    scheduler.start().await;
    assert!(scheduler.is_running().await);

    let job = scheduler
        .submit_generation(config("cfg-a", "A", 20))
        .await
        .unwrap();
    let job_id = job.id;
    let finished = common::eventually(|| {
        let scheduler = Arc::clone(&scheduler);
        async move {
            scheduler
                .job(job_id)
                .await
                .is_some_and(|j| j.status == JobStatus::Completed)
        }
    })
    .await;
    assert!(finished);

    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.is_running().await);
}
