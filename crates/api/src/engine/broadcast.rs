//! Broadcast fan-out seam and the envelopes the engine emits.

use async_trait::async_trait;
use easel_core::job::{ContinuousConfig, Job, JobKind, QueueSnapshot};
use easel_core::params::GenerationConfig;
use easel_core::protocol::{
    Envelope, MSG_TYPE_CONFIG_UPDATE, MSG_TYPE_JOB_REMOVED, MSG_TYPE_JOB_UPDATE,
    MSG_TYPE_QUEUE_UPDATE,
};
use easel_core::types::JobId;
use serde::Serialize;
use serde_json::json;

/// Pushes unsolicited envelopes to every open connection.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, envelope: Envelope);
}

/// What happened to a config, carried in `configUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigAction {
    Added,
    Updated,
    Deleted,
    Started,
    Stopped,
    Running,
    Finished,
    Removed,
}

pub fn job_update(job: &Job) -> Envelope {
    Envelope::broadcast(MSG_TYPE_JOB_UPDATE, json!(job))
}

pub fn job_removed(job_id: JobId, kind: JobKind) -> Envelope {
    Envelope::broadcast(
        MSG_TYPE_JOB_REMOVED,
        json!({ "jobId": job_id, "kind": kind }),
    )
}

pub fn queue_update(snapshot: &QueueSnapshot) -> Envelope {
    Envelope::broadcast(MSG_TYPE_QUEUE_UPDATE, json!(snapshot))
}

/// Scheduler-side transition of a continuous config.
pub fn config_status(action: ConfigAction, config: &ContinuousConfig) -> Envelope {
    Envelope::broadcast(
        MSG_TYPE_CONFIG_UPDATE,
        json!({ "action": action, "config": config }),
    )
}

/// Change in the persisted config store.
pub fn config_stored(action: ConfigAction, config: &GenerationConfig) -> Envelope {
    Envelope::broadcast(
        MSG_TYPE_CONFIG_UPDATE,
        json!({ "action": action, "config": config }),
    )
}

pub fn config_removed(config_id: &str) -> Envelope {
    Envelope::broadcast(
        MSG_TYPE_CONFIG_UPDATE,
        json!({ "action": ConfigAction::Removed, "configId": config_id }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use easel_core::params::GenerationParams;

    #[test]
    fn job_removed_payload() {
        let id = uuid::Uuid::new_v4();
        let env = job_removed(id, JobKind::Upscale);
        assert_eq!(env.kind, "jobRemoved");
        assert!(env.request_id.is_none());
        assert_eq!(env.data["jobId"], id.to_string());
        assert_eq!(env.data["kind"], "upscale");
    }

    #[test]
    fn job_update_carries_snapshot() {
        let config = GenerationConfig::new("c1", "A", GenerationParams::default());
        let job = Job::generation(config, Utc::now());
        let env = job_update(&job);
        assert_eq!(env.data["id"], job.id.to_string());
        assert_eq!(env.data["status"], "queued");
    }

    #[test]
    fn config_removed_has_id_only() {
        let env = config_removed("c1");
        assert_eq!(env.data["action"], "removed");
        assert_eq!(env.data["configId"], "c1");
        assert!(env.data.get("config").is_none());
    }
}
