//! Observers of broadcast envelopes, keyed by message type.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use easel_core::protocol::Envelope;
use tokio::sync::RwLock;

/// Handle returned by [`Subscriptions::subscribe`]; pass it back to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    kind: String,
    callback: Callback,
}

#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    entries: RwLock<Vec<Entry>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, kind: impl Into<String>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().await.push(Entry {
            id,
            kind: kind.into(),
            callback,
        });
        id
    }

    /// Returns whether the subscription existed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Hand `envelope` to every observer of its type, in registration
    /// order. A panicking observer is logged and skipped. Returns how
    /// many observers ran to completion.
    pub async fn dispatch(&self, envelope: &Envelope) -> usize {
        let matching: Vec<(SubscriptionId, Callback)> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == envelope.kind)
            .map(|e| (e.id, Arc::clone(&e.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in matching {
            match catch_unwind(AssertUnwindSafe(|| callback(envelope))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(subscription = ?id, kind = %envelope.kind, "Subscriber panicked");
                }
            }
        }
        delivered
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
