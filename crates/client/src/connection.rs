//! Connection manager: one physical WebSocket, many logical calls.
//!
//! Lifecycle is `Disconnected -> Connecting -> Connected -> Disconnected`,
//! with `Failed` latched once reconnection gives up. [`ConnectionManager`]
//! is cheap to clone; all clones share the same connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use easel_core::protocol::{is_broadcast_type, Envelope};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::correlator::PendingCalls;
use crate::error::ClientError;
use crate::reconnect::{reconnect_loop, ReconnectOutcome};
use crate::subscriptions::{Callback, SubscriptionId, Subscriptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Opening = Shared<BoxFuture<'static, Result<(), ClientError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnection gave up after this many attempts.
    Failed { attempts: u32 },
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    /// Frames queued for the writer task of the live connection.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// The open attempt in flight, shared by every concurrent `connect()`.
    opening: Mutex<Option<Opening>>,
    /// Bumped on every successful open; tasks of older connections see
    /// a stale value and stand down.
    epoch: AtomicU64,
    /// Epoch of the connection ended by `close()`; its drop is not
    /// retried. Zero when nothing was closed.
    closed_epoch: AtomicU64,
    reconnect_cancel: Mutex<Option<CancellationToken>>,
    pending: PendingCalls,
    subscriptions: Subscriptions,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                outbound: Mutex::new(None),
                opening: Mutex::new(None),
                epoch: AtomicU64::new(0),
                closed_epoch: AtomicU64::new(0),
                reconnect_cancel: Mutex::new(None),
                pending: PendingCalls::new(),
                subscriptions: Subscriptions::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of calls still waiting for a reply.
    pub async fn pending_calls(&self) -> usize {
        self.inner.pending.len().await
    }

    // -----------------------------------------------------------------------
    // Connect / close
    // -----------------------------------------------------------------------

    /// Open the connection, or join the attempt already in flight.
    ///
    /// Also clears a latched `Failed` state and cancels any reconnect
    /// loop, since the caller is asking explicitly.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if let Some(token) = self.inner.reconnect_cancel.lock().await.take() {
            token.cancel();
        }
        self.open().await
    }

    /// Open unless already connected. Concurrent callers share one
    /// handshake.
    pub(crate) async fn open(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        let attempt = {
            let mut opening = self.inner.opening.lock().await;
            match opening.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let manager = self.clone();
                    let fresh = async move { manager.establish().await }.boxed().shared();
                    *opening = Some(fresh.clone());
                    fresh
                }
            }
        };

        attempt.await
    }

    async fn establish(&self) -> Result<(), ClientError> {
        let url = self.inner.config.url.clone();
        self.set_state(ConnectionState::Connecting);

        let outcome = match tokio::time::timeout(
            self.inner.config.connect_timeout,
            connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _response))) => {
                self.attach(ws).await;
                tracing::info!(url = %url, "Connected to server");
                Ok(())
            }
            Ok(Err(e)) => Err(ClientError::Connection(format!(
                "Failed to connect to {url}: {e}"
            ))),
            Err(_) => Err(ClientError::Timeout(format!(
                "Connection to {url} not established within {:?}",
                self.inner.config.connect_timeout
            ))),
        };

        if let Err(e) = &outcome {
            tracing::warn!(url = %url, error = %e, "Connection attempt failed");
            self.set_state(ConnectionState::Disconnected);
        }
        *self.inner.opening.lock().await = None;
        outcome
    }

    /// Wire a fresh socket: writer task, reader task, state.
    async fn attach(&self, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Epoch and sender change together under the outbound lock.
        let epoch = {
            let mut outbound = self.inner.outbound.lock().await;
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *outbound = Some(tx);
            self.set_state(ConnectionState::Connected);
            epoch
        };

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => manager.handle_frame(&text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {
                        tracing::warn!("Ignoring binary frame");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            manager.on_disconnect(epoch).await;
        });
    }

    /// Close the connection deliberately. Pending calls are rejected and
    /// no reconnect is attempted.
    pub async fn close(&self) {
        if let Some(token) = self.inner.reconnect_cancel.lock().await.take() {
            token.cancel();
        }
        {
            let mut outbound = self.inner.outbound.lock().await;
            let epoch = self.inner.epoch.load(Ordering::SeqCst);
            self.inner.closed_epoch.store(epoch, Ordering::SeqCst);
            if let Some(tx) = outbound.take() {
                let _ = tx.send(Message::Close(None));
            }
            self.set_state(ConnectionState::Disconnected);
        }

        let rejected = self.inner.pending.reject_all(ClientError::Disconnected).await;
        tracing::info!(rejected, "Connection closed");
    }

    /// Boxed: the reader task spawned by `attach` awaits this, and the
    /// reconnect path leads back into `attach`.
    fn on_disconnect(&self, epoch: u64) -> BoxFuture<'static, ()> {
        let manager = self.clone();
        async move {
            let inner = &manager.inner;
            let rejected = {
                let mut outbound = inner.outbound.lock().await;
                if inner.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                outbound.take();
                manager.set_state(ConnectionState::Disconnected);
                inner.pending.reject_all(ClientError::Disconnected).await
            };
            if inner.closed_epoch.load(Ordering::SeqCst) == epoch {
                return;
            }

            tracing::warn!(rejected, "Connection lost");
            manager.spawn_reconnect().await;
        }
        .boxed()
    }

    async fn spawn_reconnect(&self) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .reconnect_cancel
            .lock()
            .await
            .replace(cancel.clone())
        {
            previous.cancel();
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let config = manager.inner.config.reconnect.clone();
            match reconnect_loop(&manager, &config, &cancel).await {
                ReconnectOutcome::Exhausted { attempts } => {
                    if manager.latch_failed(attempts) {
                        tracing::error!(attempts, "Giving up on reconnecting");
                    }
                }
                ReconnectOutcome::Reconnected { .. } | ReconnectOutcome::Cancelled => {}
            }
        });
    }

    /// Latch `Failed` unless a concurrent call connected after the last
    /// reconnect attempt.
    fn latch_failed(&self, attempts: u32) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Failed { attempts };
            true
        })
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Connection state changed");
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Send a call and wait for its reply, using the configured timeout.
    pub async fn call(&self, kind: &str, data: Value) -> Result<Value, ClientError> {
        self.call_with_timeout(kind, data, self.inner.config.call_timeout)
            .await
    }

    /// Send a call and wait up to `timeout` for its reply.
    ///
    /// Connects first when needed. A `Failed` connection is reported as
    /// such without retrying; call [`connect`](Self::connect) to retry.
    pub async fn call_with_timeout(
        &self,
        kind: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Failed { attempts } => return Err(ClientError::Failed { attempts }),
            ConnectionState::Disconnected | ConnectionState::Connecting => self.open().await?,
        }

        let (request_id, mut rx) = self.inner.pending.register().await;
        let frame = match Envelope::call(kind, request_id, data).encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.inner.pending.forget(request_id).await;
                return Err(ClientError::Protocol(e.to_string()));
            }
        };

        if !self.send_frame(frame).await {
            self.inner.pending.forget(request_id).await;
            return Err(ClientError::Disconnected);
        }
        tracing::debug!(kind, request_id, "Call sent");

        tokio::select! {
            settled = &mut rx => settled.unwrap_or(Err(ClientError::Disconnected)),
            _ = tokio::time::sleep(timeout) => {
                if self.inner.pending.forget(request_id).await {
                    tracing::warn!(kind, request_id, "Call timed out");
                    Err(ClientError::Timeout(format!("{kind} after {timeout:?}")))
                } else {
                    // Settled between the timer firing and the removal.
                    rx.await.unwrap_or(Err(ClientError::Disconnected))
                }
            }
        }
    }

    async fn send_frame(&self, frame: String) -> bool {
        match self.inner.outbound.lock().await.as_ref() {
            Some(tx) => tx.send(Message::Text(frame)).is_ok(),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn handle_frame(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        let broadcast_kind = is_broadcast_type(&envelope.kind);
        if envelope.request_id.is_some() && !broadcast_kind {
            if !self.inner.pending.resolve(envelope).await {
                tracing::debug!("Reply for a call nobody is waiting on");
            }
            return;
        }

        self.inner.subscriptions.dispatch(&envelope).await;
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Observe broadcasts of type `kind`.
    pub async fn subscribe<F>(&self, kind: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.inner.subscriptions.subscribe(kind, callback).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.unsubscribe(id).await
    }
}
