//! Shared domain types for the easel job server and its clients.
//!
//! Pure logic only: nothing in this crate performs I/O. The server
//! (`easel-api`), the backend client (`easel-sdapi`) and the realtime
//! client (`easel-client`) all build on these definitions.

pub mod backend;
pub mod error;
pub mod job;
pub mod metadata;
pub mod params;
pub mod protocol;
pub mod scheduling;
pub mod types;
