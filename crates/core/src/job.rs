//! Work items owned by the scheduler and the snapshots clients see.
//!
//! A [`Job`] is one-shot work (generation or upscale). A
//! [`ContinuousConfig`] is a generation recipe that re-enters the
//! round-robin after every run until it is stopped or removed.

use serde::{Deserialize, Serialize};

use crate::params::{GenerationConfig, GenerationParams, UpscaleSettings};
use crate::types::{ConfigId, JobId, Timestamp};

/// Display name used for upscale jobs in summaries.
pub const UPSCALE_JOB_NAME: &str = "Upscale Task";

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Generation,
    Upscale,
}

/// Job lifecycle: `Queued -> Processing -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// Kind-specific parameters of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobPayload {
    #[serde(rename_all = "camelCase")]
    Generation { config: GenerationConfig },
    #[serde(rename_all = "camelCase")]
    Upscale {
        image_path: String,
        settings: UpscaleSettings,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub progress: Option<u8>,
    pub result: Vec<String>,
    pub error: Option<String>,
}

impl Job {
    /// New queued generation job for `config`.
    pub fn generation(config: GenerationConfig, now: Timestamp) -> Self {
        Self::queued(JobKind::Generation, JobPayload::Generation { config }, now)
    }

    /// New queued upscale job for the artifact at `image_path`.
    pub fn upscale(image_path: String, settings: UpscaleSettings, now: Timestamp) -> Self {
        Self::queued(
            JobKind::Upscale,
            JobPayload::Upscale {
                image_path,
                settings,
            },
            now,
        )
    }

    fn queued(kind: JobKind, payload: JobPayload, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            status: JobStatus::Queued,
            payload,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            progress: None,
            result: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        match &self.payload {
            JobPayload::Generation { config } => &config.name,
            JobPayload::Upscale { .. } => UPSCALE_JOB_NAME,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            kind: self.kind,
            name: self.name().to_string(),
            status: self.status,
            progress: self.progress.unwrap_or(0),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Compact per-job view used in queue snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Continuous config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigStatus {
    Active,
    Processing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousConfig {
    pub id: ConfigId,
    pub name: String,
    pub parameters: GenerationParams,
    pub status: ConfigStatus,
    pub completed_runs: u32,
    pub failed_runs: u32,
    pub last_run_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub last_artifacts: Vec<String>,
    pub stopped_at: Option<Timestamp>,
}

impl ContinuousConfig {
    /// Fresh, active config built from a stored recipe.
    pub fn from_config(config: GenerationConfig) -> Self {
        Self {
            id: config.id,
            name: config.name,
            parameters: config.params,
            status: ConfigStatus::Active,
            completed_runs: 0,
            failed_runs: 0,
            last_run_at: None,
            last_error: None,
            last_artifacts: Vec::new(),
            stopped_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the scheduler, broadcast as `queueUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// A unit of work is currently in flight.
    pub processing: bool,
    pub active_job_id: Option<JobId>,
    pub active_config_id: Option<ConfigId>,
    /// Queued jobs plus active continuous configs.
    pub queue_depth: usize,
    pub upscale_queue_length: usize,
    pub generation_queue_length: usize,
    pub jobs: Vec<JobSummary>,
    pub configs: Vec<ContinuousConfig>,
}
