//! In-memory registry of jobs and continuous configs.
//!
//! One map per item type holds the data; the queues hold ids only:
//!
//! - `upscale_queue`: priority FIFO of upscale jobs.
//! - `generation_queue`: FIFO of one-shot generation jobs.
//! - `rotation`: round-robin order of *active* continuous configs.
//!
//! A config id is in `rotation` exactly when its status is `Active`.
//! While a config runs it is out of the rotation and re-enters at the
//! tail when the run finishes, unless it was stopped or removed
//! meanwhile. All methods are synchronous; the scheduler serialises
//! access behind its lock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use easel_core::error::CoreError;
use easel_core::job::{
    ConfigStatus, ContinuousConfig, Job, JobPayload, JobStatus, QueueSnapshot,
};
use easel_core::params::{GenerationConfig, GenerationParams, UpscaleSettings};
use easel_core::scheduling::is_expired;
use easel_core::types::{ConfigId, JobId, Timestamp};

/// The unit of work currently in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    Job(JobId),
    Config(ConfigId),
}

/// Owned copy of what a unit needs to execute, taken when it starts so
/// the registry lock is not held during backend calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    Generation {
        name: String,
        params: GenerationParams,
    },
    Upscale {
        image_path: String,
        settings: UpscaleSettings,
    },
}

/// A unit that was just moved to Processing.
#[derive(Debug, Clone)]
pub struct Started {
    pub unit: Unit,
    pub work: Work,
    /// Snapshot of the item after the transition.
    pub item: Item,
}

/// Snapshot of a job or config after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Job(Job),
    Config(ContinuousConfig),
    /// The config was removed while its run was in flight.
    RemovedConfig(ConfigId),
}

/// Items dropped by [`Registry::evict_expired`].
#[derive(Debug, Default)]
pub struct Evicted {
    pub jobs: Vec<Job>,
    pub configs: Vec<ContinuousConfig>,
}

impl Evicted {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.configs.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    jobs: HashMap<JobId, Job>,
    configs: HashMap<ConfigId, ContinuousConfig>,
    upscale_queue: VecDeque<JobId>,
    generation_queue: VecDeque<JobId>,
    rotation: VecDeque<ConfigId>,
    in_flight: Option<Unit>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- submission ----

    /// Queue a one-shot generation job. The config must carry an id.
    pub fn submit_generation(
        &mut self,
        config: GenerationConfig,
        now: Timestamp,
    ) -> Result<Job, CoreError> {
        if !config.has_identity() {
            return Err(CoreError::Validation("Configuration must have an ID".into()));
        }
        let job = Job::generation(config, now);
        self.generation_queue.push_back(job.id);
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Queue an upscale job at the tail of the priority queue.
    pub fn submit_upscale(
        &mut self,
        image_path: String,
        settings: UpscaleSettings,
        now: Timestamp,
    ) -> Job {
        let job = Job::upscale(image_path, settings, now);
        self.upscale_queue.push_back(job.id);
        self.jobs.insert(job.id, job.clone());
        job
    }

    /// Remove a job that is not running.
    ///
    /// Queued jobs are dropped from their queue; finished jobs are simply
    /// dismissed. A Processing job cannot be cancelled because the
    /// backend has no abort primitive.
    pub fn cancel(&mut self, id: JobId) -> Result<Job, CoreError> {
        let status = self
            .jobs
            .get(&id)
            .map(|job| job.status)
            .ok_or_else(|| CoreError::not_found("Job", id))?;

        if status == JobStatus::Processing {
            return Err(CoreError::InvalidState(format!(
                "Job {id} is processing and cannot be cancelled"
            )));
        }

        self.upscale_queue.retain(|queued| *queued != id);
        self.generation_queue.retain(|queued| *queued != id);
        self.jobs
            .remove(&id)
            .ok_or_else(|| CoreError::not_found("Job", id))
    }

    // ---- continuous configs ----

    /// Register a config for continuous generation, or re-activate a
    /// stopped one. Already active or running configs only pick up the
    /// new name and parameters.
    pub fn start_config(&mut self, config: GenerationConfig) -> Result<ContinuousConfig, CoreError> {
        if !config.has_identity() {
            return Err(CoreError::Validation("Configuration must have an ID".into()));
        }
        if self
            .configs
            .values()
            .any(|c| c.id != config.id && c.name == config.name)
        {
            return Err(CoreError::Conflict(format!(
                "Configuration \"{}\" already exists",
                config.name
            )));
        }

        let running = self.in_flight == Some(Unit::Config(config.id.clone()));

        let Some(existing) = self.configs.get_mut(&config.id) else {
            let continuous = ContinuousConfig::from_config(config);
            self.rotation.push_back(continuous.id.clone());
            self.configs
                .insert(continuous.id.clone(), continuous.clone());
            return Ok(continuous);
        };

        existing.name = config.name;
        existing.parameters = config.params;

        if existing.status == ConfigStatus::Stopped {
            existing.stopped_at = None;
            if running {
                // The in-flight run re-enters the rotation when it finishes.
                existing.status = ConfigStatus::Processing;
            } else {
                existing.status = ConfigStatus::Active;
                self.rotation.push_back(existing.id.clone());
            }
        }

        Ok(existing.clone())
    }

    /// Stop a config. A running config finishes its current run but does
    /// not re-enter the rotation.
    pub fn stop_config(&mut self, id: &str, now: Timestamp) -> Result<ContinuousConfig, CoreError> {
        let config = self
            .configs
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("Configuration", id))?;

        match config.status {
            ConfigStatus::Active => {
                self.rotation.retain(|queued| queued != id);
                config.status = ConfigStatus::Stopped;
                config.stopped_at = Some(now);
            }
            ConfigStatus::Processing => {
                config.status = ConfigStatus::Stopped;
                config.stopped_at = Some(now);
            }
            ConfigStatus::Stopped => {}
        }

        Ok(config.clone())
    }

    /// Delete a config from the registry. A running config finishes its
    /// current run, whose re-entry is then skipped.
    pub fn remove_config(&mut self, id: &str) -> Result<ContinuousConfig, CoreError> {
        let removed = self
            .configs
            .remove(id)
            .ok_or_else(|| CoreError::not_found("Configuration", id))?;
        self.rotation.retain(|queued| queued != id);
        Ok(removed)
    }

    // ---- execution ----

    /// Pick the next unit and mark it Processing.
    ///
    /// Order: nothing while a unit is in flight; then the upscale queue;
    /// then one-shot generation jobs; then the head of the rotation.
    pub fn begin_next(&mut self, now: Timestamp) -> Option<Started> {
        if self.in_flight.is_some() {
            return None;
        }

        while let Some(id) = self.upscale_queue.pop_front() {
            if let Some(started) = self.begin_job(id, now) {
                return Some(started);
            }
        }

        while let Some(id) = self.generation_queue.pop_front() {
            if let Some(started) = self.begin_job(id, now) {
                return Some(started);
            }
        }

        while let Some(id) = self.rotation.pop_front() {
            let Some(config) = self.configs.get_mut(&id) else {
                continue;
            };
            if config.status != ConfigStatus::Active {
                continue;
            }
            config.status = ConfigStatus::Processing;
            let work = Work::Generation {
                name: config.name.clone(),
                params: config.parameters.clone(),
            };
            let item = Item::Config(config.clone());
            self.in_flight = Some(Unit::Config(id.clone()));
            return Some(Started {
                unit: Unit::Config(id),
                work,
                item,
            });
        }

        None
    }

    fn begin_job(&mut self, id: JobId, now: Timestamp) -> Option<Started> {
        let job = self.jobs.get_mut(&id)?;
        if !job.status.can_transition_to(JobStatus::Processing) {
            return None;
        }

        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.progress = Some(0);

        let work = match &job.payload {
            JobPayload::Generation { config } => Work::Generation {
                name: config.name.clone(),
                params: config.params.clone(),
            },
            JobPayload::Upscale {
                image_path,
                settings,
            } => Work::Upscale {
                image_path: image_path.clone(),
                settings: settings.clone(),
            },
        };
        let item = Item::Job(job.clone());
        self.in_flight = Some(Unit::Job(id));
        Some(Started {
            unit: Unit::Job(id),
            work,
            item,
        })
    }

    /// Record the outcome of the in-flight unit and release the
    /// single-flight slot. Returns `None` when nothing was in flight.
    pub fn finish(&mut self, outcome: Result<Vec<String>, String>, now: Timestamp) -> Option<Item> {
        match self.in_flight.take()? {
            Unit::Job(id) => {
                let job = self.jobs.get_mut(&id)?;
                match outcome {
                    Ok(paths) => {
                        job.status = JobStatus::Completed;
                        job.progress = Some(100);
                        job.result = paths;
                        job.error = None;
                    }
                    Err(message) => {
                        job.status = JobStatus::Failed;
                        job.error = Some(message);
                    }
                }
                job.completed_at = Some(now);
                Some(Item::Job(job.clone()))
            }
            Unit::Config(id) => {
                let Some(config) = self.configs.get_mut(&id) else {
                    return Some(Item::RemovedConfig(id));
                };

                config.last_run_at = Some(now);
                match outcome {
                    Ok(paths) => {
                        config.completed_runs += 1;
                        config.last_artifacts = paths;
                        config.last_error = None;
                    }
                    Err(message) => {
                        config.failed_runs += 1;
                        config.last_error = Some(message);
                    }
                }

                if config.status == ConfigStatus::Processing {
                    config.status = ConfigStatus::Active;
                    if !self.rotation.contains(&id) {
                        self.rotation.push_back(id);
                    }
                }
                Some(Item::Config(config.clone()))
            }
        }
    }

    // ---- housekeeping ----

    /// Drop terminal jobs and stopped configs older than `retention`.
    pub fn evict_expired(&mut self, now: Timestamp, retention: Duration) -> Evicted {
        let expired_jobs: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .filter(|job| {
                job.completed_at
                    .is_some_and(|done| is_expired(done, now, retention))
            })
            .map(|job| job.id)
            .collect();

        let running = self.in_flight.clone();
        let expired_configs: Vec<ConfigId> = self
            .configs
            .values()
            .filter(|c| c.status == ConfigStatus::Stopped)
            .filter(|c| running.as_ref() != Some(&Unit::Config(c.id.clone())))
            .filter(|c| {
                c.stopped_at
                    .is_some_and(|stopped| is_expired(stopped, now, retention))
            })
            .map(|c| c.id.clone())
            .collect();

        Evicted {
            jobs: expired_jobs
                .into_iter()
                .filter_map(|id| self.jobs.remove(&id))
                .collect(),
            configs: expired_configs
                .into_iter()
                .filter_map(|id| self.configs.remove(&id))
                .collect(),
        }
    }

    // ---- reads ----

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn config(&self, id: &str) -> Option<&ContinuousConfig> {
        self.configs.get(id)
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Active configs in round-robin order.
    pub fn rotation(&self) -> Vec<ConfigId> {
        self.rotation.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));

        let mut configs: Vec<ContinuousConfig> = self.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));

        QueueSnapshot {
            processing: self.in_flight.is_some(),
            active_job_id: match &self.in_flight {
                Some(Unit::Job(id)) => Some(*id),
                _ => None,
            },
            active_config_id: match &self.in_flight {
                Some(Unit::Config(id)) => Some(id.clone()),
                _ => None,
            },
            queue_depth: self.upscale_queue.len()
                + self.generation_queue.len()
                + self.rotation.len(),
            upscale_queue_length: self.upscale_queue.len(),
            generation_queue_length: self.generation_queue.len(),
            jobs: jobs.into_iter().map(Job::summary).collect(),
            configs,
        }
    }
}
