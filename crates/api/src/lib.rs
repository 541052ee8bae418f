//! Easel API server library.
//!
//! Exposes the building blocks (config, state, engine, storage, message
//! handlers, WebSocket transport, routes) so integration tests and the
//! binary entrypoint share them.

pub mod config;
pub mod engine;
pub mod router;
pub mod routes;
pub mod rpc;
pub mod state;
pub mod storage;
pub mod ws;
