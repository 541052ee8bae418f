//! Pending-call bookkeeping.
//!
//! Every outgoing call registers a one-shot slot keyed by its
//! `requestId`. Exactly one of three paths removes it: a matching reply,
//! the caller's timeout, or a disconnect. Each path removes the entry
//! first and only acts if it was still there, so a call is never
//! resolved twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use easel_core::protocol::Envelope;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::error::ClientError;

pub type CallResult = Result<Value, ClientError>;

pub struct PendingCalls {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallResult>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next request id and register a slot for it.
    pub async fn register(&self) -> (u64, oneshot::Receiver<CallResult>) {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);
        (request_id, rx)
    }

    /// Settle the call matching `reply`. Returns `false` for replies
    /// nobody is waiting on (late or unknown).
    pub async fn resolve(&self, reply: Envelope) -> bool {
        let Some(request_id) = reply.request_id else {
            return false;
        };
        let Some(tx) = self.pending.lock().await.remove(&request_id) else {
            return false;
        };

        let result = if reply.is_error() {
            Err(ClientError::from_remote(reply.error_body()))
        } else {
            Ok(reply.data)
        };
        // The caller may have gone away; nothing to do then.
        let _ = tx.send(result);
        true
    }

    /// Drop the slot for `request_id` without settling it. Returns
    /// whether it was still pending.
    pub async fn forget(&self, request_id: u64) -> bool {
        self.pending.lock().await.remove(&request_id).is_some()
    }

    /// Reject every pending call with `error`. Returns how many there were.
    pub async fn reject_all(&self, error: ClientError) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}
