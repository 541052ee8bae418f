//! Handlers for every call type, grouped by concern.

pub mod backend;
pub mod configs;
pub mod jobs;

use easel_core::error::CoreError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Fetch a required field from the call data.
pub(crate) fn require_param<'a>(data: &'a Value, key: &str) -> Result<&'a Value, CoreError> {
    data.get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| CoreError::Validation(format!("Missing '{key}'")))
}

/// Fetch a required, non-empty string field.
pub(crate) fn require_string_param<'a>(data: &'a Value, key: &str) -> Result<&'a str, CoreError> {
    require_param(data, key)?
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CoreError::Validation(format!("'{key}' must be a non-empty string")))
}

/// Deserialize a field (or the whole payload) into a typed value.
pub(crate) fn parse_param<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, CoreError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CoreError::Validation(format!("Invalid {what}: {e}")))
}

/// Encode a handler result.
pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Internal(e.to_string()))
}
