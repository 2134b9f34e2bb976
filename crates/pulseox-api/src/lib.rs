//! HTTP surface for PulseOx.
//!
//! Thin axum handlers over the device, record and notification components.
//! Two authentication schemes: device-posted records authenticate with the
//! device id/secret header pair; everything else carries a bearer token
//! verified through the external identity service.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod models;
pub mod server;

pub use auth::HttpIdentityVerifier;
pub use error::ApiError;
pub use llm::{LlmConfig, OpenAiCompatGenerator};
pub use server::{create_router, ServerState};
