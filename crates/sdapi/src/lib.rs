//! HTTP client for a Stable Diffusion WebUI (`/sdapi/v1`) backend.
//!
//! [`SdApi`] wraps the endpoints the job server needs and implements
//! [`easel_core::backend::GenerationBackend`] so the scheduler can drive
//! it without knowing about HTTP.

pub mod api;

pub use api::{SdApi, SdApiError, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
