//! The generation backend seam.
//!
//! [`GenerationClient`] is the only contact surface with the external
//! text-generation service; everything behind it (model choice, transport,
//! prompt formatting quirks) is out of the core's hands. All calls from all
//! components are funneled through the [`RequestGate`], which owns rate
//! discipline and retries.

pub mod gate;
pub mod http;
pub mod schema;

pub use gate::{GateConfig, RequestGate};
pub use http::HttpGenerationClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single structured prompt for the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    /// When set, the caller expects a machine-readable JSON reply and the
    /// backend should be steered toward one.
    pub json_mode: bool,
}

impl GenerationRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: false,
        }
    }

    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: true,
        }
    }
}

/// Failures a backend call can surface. Both variants are retryable; the
/// gate applies exponential backoff to `RateLimited` and a fixed delay to
/// `Transient`.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("backend rate limited the request")]
    RateLimited,

    #[error("transient backend failure: {0}")]
    Transient(String),
}

/// The opaque generation oracle.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ClientError>;
}
