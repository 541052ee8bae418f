use easel_core::error::{CODE_INVALID_STATE, CODE_NOT_FOUND};
use easel_core::protocol::ErrorBody;

/// Errors surfaced to callers of the connection manager.
///
/// `Clone` so that one connect outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The WebSocket handshake failed.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The connection dropped while the call was pending.
    #[error("WebSocket disconnected")]
    Disconnected,

    /// Reconnection gave up; only an explicit `connect()` retries.
    #[error("Connection failed after {attempts} reconnect attempts")]
    Failed { attempts: u32 },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    /// Any other error reply from the server.
    #[error("{message}")]
    Remote {
        code: Option<String>,
        message: String,
    },

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Map an error reply back onto a typed variant where the code is
    /// one callers commonly branch on.
    pub fn from_remote(body: ErrorBody) -> Self {
        match body.code.as_deref() {
            Some(CODE_NOT_FOUND) => Self::NotFound(body.message),
            Some(CODE_INVALID_STATE) => Self::InvalidState(body.message),
            _ => Self::Remote {
                code: body.code,
                message: body.message,
            },
        }
    }
}
