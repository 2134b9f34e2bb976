//! Opaque text-generation collaborator.
//!
//! The assistant endpoint treats the language model as an external
//! completion service: prompt in, text out. Prompt construction lives with
//! the caller; provider specifics live with the implementation.

use async_trait::async_trait;

use crate::error::Result;

/// Text-completion interface.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the given prompt.
    ///
    /// Provider failures and timeouts surface as [`crate::Error::Upstream`].
    async fn complete(&self, prompt: &str) -> Result<String>;
}
