//! Job execution engine: the in-memory registry, the tick-driven
//! scheduler that drains it, and the broadcast seam it reports through.

pub mod broadcast;
pub mod registry;
pub mod scheduler;

pub use broadcast::{Broadcaster, ConfigAction};
pub use scheduler::Scheduler;
