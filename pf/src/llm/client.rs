//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent
///
/// Implementations issue exactly one billable call per `complete` and must
/// not retry rate-limit rejections themselves: a 429 is surfaced as
/// [`LlmError::RateLimited`] so the scheduler can account for it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
