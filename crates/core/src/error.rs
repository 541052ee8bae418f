/// Domain error taxonomy shared by the scheduler, the stores and the
/// remote-call handlers.
///
/// Every variant has a stable wire code (see [`CoreError::code`]) that is
/// carried in error envelopes next to the human-readable message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Backend(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_INVALID_STATE: &str = "INVALID_STATE";
pub const CODE_VALIDATION: &str = "VALIDATION_ERROR";
pub const CODE_CONFLICT: &str = "CONFLICT";
pub const CODE_BACKEND: &str = "BACKEND_ERROR";
pub const CODE_PROTOCOL: &str = "PROTOCOL_ERROR";
pub const CODE_TIMEOUT: &str = "TIMEOUT";
pub const CODE_INTERNAL: &str = "INTERNAL_ERROR";

impl CoreError {
    /// Shorthand for a missing entity.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => CODE_NOT_FOUND,
            Self::InvalidState(_) => CODE_INVALID_STATE,
            Self::Validation(_) => CODE_VALIDATION,
            Self::Conflict(_) => CODE_CONFLICT,
            Self::Backend(_) => CODE_BACKEND,
            Self::Protocol(_) => CODE_PROTOCOL,
            Self::Timeout(_) => CODE_TIMEOUT,
            Self::Internal(_) => CODE_INTERNAL,
        }
    }
}
