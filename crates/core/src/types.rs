/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Jobs are keyed by a server-assigned UUID.
pub type JobId = uuid::Uuid;

/// Continuous configs are keyed by the id of the generation config they
/// were started from. The id is assigned once and never changes.
pub type ConfigId = String;
