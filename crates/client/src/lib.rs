//! Realtime client for the easel job server.
//!
//! [`ConnectionManager`] owns one WebSocket connection to the server and
//! multiplexes any number of concurrent calls over it, correlating
//! replies by `requestId`. Broadcasts are fanned out to observers
//! registered with [`ConnectionManager::subscribe`]. Unexpected drops
//! are retried with exponential backoff.

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod reconnect;
pub mod subscriptions;

pub use config::{ClientConfig, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::ClientError;
pub use subscriptions::SubscriptionId;
