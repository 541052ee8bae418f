//! WebSocket transport: connection tracking, heartbeat, and the upgrade
//! handler that feeds inbound calls to the handler registry.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
