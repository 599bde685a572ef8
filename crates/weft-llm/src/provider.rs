//! LLM provider trait and error type

use async_trait::async_trait;
use thiserror::Error;

/// Errors from LLM providers.
///
/// The scheduler treats every variant the same way: the attempt failed, the
/// message becomes part of the task's `[error:<name>]` result if retries
/// run out.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider not available")]
    NotAvailable,
}

/// A completion backend.
///
/// Implementations may block arbitrarily; the runtime never cancels an
/// in-flight call. Errors are returned, not panicked.
#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// Provider name, for diagnostics.
    fn name(&self) -> &str {
        "llm"
    }

    /// Produce a completion for `prompt`, optionally conditioned on the
    /// calling agent's `role`.
    async fn complete(&self, prompt: &str, role: Option<&str>) -> Result<String, LlmError>;
}
