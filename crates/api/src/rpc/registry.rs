//! Message-type registry and async dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use easel_core::error::{CoreError, CODE_PROTOCOL};
use easel_core::protocol::Envelope;
use futures::FutureExt;
use serde_json::Value;

use crate::state::AppState;

/// Default upper bound on one handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(600);

/// Trait implemented by every inbound message handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Execute the handler with the envelope's `data`.
    async fn handle(&self, data: Value, state: &AppState) -> Result<Value, CoreError>;
}

/// Registry mapping message types to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    timeout: Duration,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HANDLER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register a handler for a message type, replacing any previous one.
    pub fn register(&mut self, kind: &str, handler: impl MessageHandler + 'static) {
        if self
            .handlers
            .insert(kind.to_owned(), Arc::new(handler))
            .is_some()
        {
            tracing::debug!(kind, "Handler replaced");
        }
    }

    /// Dispatch an inbound envelope.
    ///
    /// Returns the reply to send back, or `None` when the envelope carried
    /// no `requestId` and so expects no answer. Handler errors, timeouts
    /// and panics all become error envelopes.
    pub async fn dispatch(&self, request: Envelope, state: &AppState) -> Option<Envelope> {
        let kind = request.kind.clone();
        let request_id = request.request_id;

        let Some(handler) = self.handlers.get(&kind).cloned() else {
            tracing::warn!(kind = %kind, request_id, "Unknown message type");
            return request_id.map(|_| {
                Envelope::error(
                    request_id,
                    format!("Unknown message type: {kind}"),
                    CODE_PROTOCOL,
                )
            });
        };

        let start = std::time::Instant::now();
        let call = AssertUnwindSafe(handler.handle(request.data.clone(), state)).catch_unwind();
        let result = tokio::time::timeout(self.timeout, call).await;

        let reply = match result {
            Ok(Ok(Ok(data))) => Envelope::response_to(&request, data),
            Ok(Ok(Err(err))) => {
                tracing::debug!(kind = %kind, request_id, error = %err, "Handler returned error");
                Envelope::from_error(request_id, &err)
            }
            Ok(Err(_panic)) => {
                tracing::error!(kind = %kind, request_id, "Handler panicked");
                Envelope::from_error(
                    request_id,
                    &CoreError::Internal(format!("Handler for '{kind}' panicked")),
                )
            }
            Err(_elapsed) => {
                tracing::error!(kind = %kind, request_id, "Handler timed out after {:?}", self.timeout);
                Envelope::from_error(
                    request_id,
                    &CoreError::Timeout(format!("Handler for '{kind}'")),
                )
            }
        };

        let duration = start.elapsed();
        if duration.as_secs() >= 5 {
            tracing::warn!(
                kind = %kind,
                duration_secs = duration.as_secs_f64(),
                "Slow handler"
            );
        }

        request_id.map(|_| reply)
    }

    /// All registered message types, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
