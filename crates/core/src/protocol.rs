//! Wire envelope and message-type constants for the realtime channel.
//!
//! Every WebSocket text frame carries exactly one [`Envelope`]:
//!
//! ```json
//! { "type": "cancelJob", "requestId": 7, "data": { "jobId": "..." } }
//! ```
//!
//! A `requestId` marks a call/response pair; broadcasts omit it. Replies
//! to a call use the type `<call type>:response`, failures use `error`
//! with `data = { message, code }`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Reserved types
// ---------------------------------------------------------------------------

/// Error reply to a call (or an unsolicited server-side error).
pub const MSG_TYPE_ERROR: &str = "error";

/// Suffix appended to a call type to form its success reply type.
pub const RESPONSE_SUFFIX: &str = ":response";

/// Snapshot of a single job after any transition.
pub const MSG_TYPE_JOB_UPDATE: &str = "jobUpdate";

/// A job left the registry (cancelled, dismissed or evicted).
pub const MSG_TYPE_JOB_REMOVED: &str = "jobRemoved";

/// Full scheduler snapshot after any transition.
pub const MSG_TYPE_QUEUE_UPDATE: &str = "queueUpdate";

/// Server status (backend health + scheduler snapshot).
pub const MSG_TYPE_SERVER_STATUS: &str = "serverStatus";

/// A continuous config or a stored generation config changed.
pub const MSG_TYPE_CONFIG_UPDATE: &str = "configUpdate";

/// Message types that are always fanned out to subscribers, even when a
/// `requestId` happens to be attached.
pub const BROADCAST_TYPES: &[&str] = &[
    MSG_TYPE_JOB_UPDATE,
    MSG_TYPE_JOB_REMOVED,
    MSG_TYPE_QUEUE_UPDATE,
    MSG_TYPE_SERVER_STATUS,
    MSG_TYPE_CONFIG_UPDATE,
];

// ---------------------------------------------------------------------------
// Call types
// ---------------------------------------------------------------------------

pub const CALL_START_GENERATION: &str = "startGeneration";
pub const CALL_QUEUE_UPSCALE: &str = "queueUpscale";
pub const CALL_CANCEL_JOB: &str = "cancelJob";
pub const CALL_GET_SERVER_STATUS: &str = "getServerStatus";
pub const CALL_START_CONFIG: &str = "startConfig";
pub const CALL_STOP_CONFIG: &str = "stopConfig";
pub const CALL_REMOVE_CONFIG: &str = "removeConfig";
pub const CALL_GET_CONFIGS: &str = "getConfigs";
pub const CALL_ADD_CONFIG: &str = "addConfig";
pub const CALL_UPDATE_CONFIG: &str = "updateConfig";
pub const CALL_DELETE_CONFIG: &str = "deleteConfig";
pub const CALL_GET_DEFAULT_CONFIG: &str = "getDefaultConfig";
pub const CALL_GET_MODELS: &str = "getModels";
pub const CALL_GET_SAMPLERS: &str = "getSamplers";
pub const CALL_GET_UPSCALERS: &str = "getUpscalers";
pub const CALL_GET_SCHEDULERS: &str = "getSchedulers";
pub const CALL_SET_MODEL: &str = "setModel";

/// Whether `kind` is one of the reserved broadcast types.
pub fn is_broadcast_type(kind: &str) -> bool {
    BROADCAST_TYPES.contains(&kind)
}

/// Reply type for a successful call of type `kind`.
pub fn response_type(kind: &str) -> String {
    format!("{kind}{RESPONSE_SUFFIX}")
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit of wire communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

/// Decoded body of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Envelope {
    /// Outbound call with a correlation id.
    pub fn call(kind: impl Into<String>, request_id: u64, data: Value) -> Self {
        Self {
            kind: kind.into(),
            request_id: Some(request_id),
            data,
        }
    }

    /// Unsolicited broadcast (no correlation id).
    pub fn broadcast(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            request_id: None,
            data,
        }
    }

    /// Success reply to the call `request`.
    pub fn response_to(request: &Envelope, data: Value) -> Self {
        Self {
            kind: response_type(&request.kind),
            request_id: request.request_id,
            data,
        }
    }

    /// Error reply with a plain message and wire code.
    pub fn error(request_id: Option<u64>, message: impl Into<String>, code: &str) -> Self {
        Self {
            kind: MSG_TYPE_ERROR.to_string(),
            request_id,
            data: json!({ "message": message.into(), "code": code }),
        }
    }

    /// Error reply derived from a domain error.
    pub fn from_error(request_id: Option<u64>, err: &CoreError) -> Self {
        Self::error(request_id, err.to_string(), err.code())
    }

    pub fn is_error(&self) -> bool {
        self.kind == MSG_TYPE_ERROR
    }

    /// Extract `{message, code}` from an error envelope.
    ///
    /// Peers that only send `{message}` (or nothing usable) still yield a
    /// message so callers always have something to show.
    pub fn error_body(&self) -> ErrorBody {
        serde_json::from_value::<ErrorBody>(self.data.clone()).unwrap_or_else(|_| ErrorBody {
            message: self
                .data
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| "Unknown error".to_string()),
            code: None,
        })
    }

    /// Serialize to a single text frame.
    pub fn encode(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Protocol(e.to_string()))
    }

    /// Parse one text frame.
    pub fn decode(frame: &str) -> Result<Self, CoreError> {
        serde_json::from_str(frame).map_err(|e| CoreError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CODE_INVALID_STATE;
    use assert_matches::assert_matches;

    #[test]
    fn call_encodes_with_camel_case_request_id() {
        let env = Envelope::call(CALL_CANCEL_JOB, 7, json!({"jobId": "x"}));
        let text = env.encode().unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["type"], "cancelJob");
        assert_eq!(raw["requestId"], 7);
        assert_eq!(raw["data"]["jobId"], "x");
    }

    #[test]
    fn broadcast_omits_request_id() {
        let text = Envelope::broadcast(MSG_TYPE_JOB_UPDATE, json!({}))
            .encode()
            .unwrap();
        assert!(!text.contains("requestId"));
    }

    #[test]
    fn decode_defaults_missing_data_to_null() {
        let env = Envelope::decode(r#"{"type":"getServerStatus","requestId":1}"#).unwrap();
        assert_eq!(env.kind, CALL_GET_SERVER_STATUS);
        assert_eq!(env.request_id, Some(1));
        assert!(env.data.is_null());
    }

    #[test]
    fn decode_rejects_malformed_frames() {
        assert_matches!(Envelope::decode("not json"), Err(CoreError::Protocol(_)));
        assert_matches!(Envelope::decode(r#"{"data":1}"#), Err(CoreError::Protocol(_)));
    }

    #[test]
    fn response_carries_request_id_and_suffixed_type() {
        let req = Envelope::call(CALL_GET_MODELS, 42, Value::Null);
        let resp = Envelope::response_to(&req, json!([]));
        assert_eq!(resp.kind, "getModels:response");
        assert_eq!(resp.request_id, Some(42));
    }

    #[test]
    fn error_envelope_round_trips_code() {
        let err = CoreError::InvalidState("Job is processing".into());
        let env = Envelope::from_error(Some(3), &err);
        assert!(env.is_error());
        let body = env.error_body();
        assert_eq!(body.message, "Job is processing");
        assert_eq!(body.code.as_deref(), Some(CODE_INVALID_STATE));
    }

    #[test]
    fn error_body_tolerates_message_only_payloads() {
        let env = Envelope {
            kind: MSG_TYPE_ERROR.into(),
            request_id: Some(1),
            data: json!({"message": "Unknown message type: foo"}),
        };
        let body = env.error_body();
        assert_eq!(body.message, "Unknown message type: foo");
        assert!(body.code.is_none());
    }

    #[test]
    fn broadcast_types_are_recognised() {
        assert!(is_broadcast_type(MSG_TYPE_JOB_REMOVED));
        assert!(is_broadcast_type(MSG_TYPE_CONFIG_UPDATE));
        assert!(!is_broadcast_type(CALL_START_GENERATION));
        assert!(!is_broadcast_type(MSG_TYPE_ERROR));
    }
}
