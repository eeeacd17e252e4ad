//! LLM request/response types
//!
//! Requests are serializable so they can be reduced to a canonical cache
//! key; responses are serializable so they can be stored in the cache.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identity; empty means the client's configured model
    #[serde(default)]
    pub model: String,

    /// System prompt
    #[serde(default, rename = "system")]
    pub system_prompt: String,

    /// Conversation messages
    pub messages: Vec<Message>,

    /// Max tokens for response
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Rough input token estimate (about four characters per token)
    pub fn estimate_input_tokens(&self) -> u64 {
        let chars = self.system_prompt.len() + self.messages.iter().map(|m| m.content.len()).sum::<usize>();
        let estimate = (chars as u64).div_ceil(4);
        debug!(chars, estimate, "CompletionRequest::estimate_input_tokens: called");
        estimate
    }

    /// Output token estimate: the requested ceiling
    pub fn estimate_output_tokens(&self) -> u64 {
        u64::from(self.max_tokens)
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Response from a completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Text content (if any)
    pub content: Option<String>,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage for cost tracking
    pub usage: TokenUsage,

    /// Rate-limit state reported alongside this response; never cached
    #[serde(skip)]
    pub rate_limits: RateLimitMetadata,
}

impl CompletionResponse {
    /// Plain text response with the given usage
    pub fn text(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: Some(content.into()),
            stop_reason: StopReason::EndTurn,
            usage,
            rate_limits: RateLimitMetadata::default(),
        }
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl StopReason {
    /// Parse from Anthropic API stop_reason string
    pub fn from_anthropic(s: &str) -> Self {
        match s {
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
}

/// Authoritative state of one rate-limit window as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Instant,
}

impl WindowInfo {
    /// Window that resets `reset_in` from now
    pub fn resetting_in(limit: u64, remaining: u64, reset_in: Duration) -> Self {
        Self {
            limit,
            remaining,
            reset_at: Instant::now() + reset_in,
        }
    }
}

/// Rate-limit metadata carried on replies and rejections
///
/// Every field is optional: providers report different subsets, and a
/// missing field simply leaves the corresponding local state alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitMetadata {
    pub requests: Option<WindowInfo>,
    pub input_tokens: Option<WindowInfo>,
    pub output_tokens: Option<WindowInfo>,
    pub retry_after: Option<Duration>,
}

impl RateLimitMetadata {
    /// True when no window and no retry hint is present
    pub fn is_empty(&self) -> bool {
        self.requests.is_none()
            && self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.retry_after.is_none()
    }

    /// True when at least one window carries authoritative budget state
    pub fn has_windows(&self) -> bool {
        self.requests.is_some() || self.input_tokens.is_some() || self.output_tokens.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "claude-sonnet-4".to_string(),
            system_prompt: "abcd".to_string(),
            messages: vec![Message::user("12345678"), Message::assistant("xy")],
            max_tokens: 256,
            temperature: None,
        }
    }

    #[test]
    fn test_estimates() {
        let req = request();
        // 4 + 8 + 2 = 14 chars -> 4 tokens
        assert_eq!(req.estimate_input_tokens(), 4);
        assert_eq!(req.estimate_output_tokens(), 256);
    }

    #[test]
    fn test_request_parses_from_jsonl_shape() {
        let line = r#"{"model":"m","system":"s","messages":[{"role":"user","content":"hi"}],"max_tokens":10}"#;
        let req: CompletionRequest = serde_json::from_str(line).unwrap();
        assert_eq!(req.system_prompt, "s");
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.temperature, None);
    }

    #[test]
    fn test_response_serialization_skips_rate_limits() {
        let mut resp = CompletionResponse::text(
            "ok",
            TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        );
        resp.rate_limits.retry_after = Some(Duration::from_secs(1));

        let json = serde_json::to_string(&resp).unwrap();
        let back: CompletionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content.as_deref(), Some("ok"));
        assert_eq!(back.usage.input_tokens, 10);
        assert!(back.rate_limits.is_empty());
    }

    #[test]
    fn test_stop_reason_from_anthropic() {
        assert_eq!(StopReason::from_anthropic("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::from_anthropic("max_tokens"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_anthropic("unknown"), StopReason::EndTurn);
    }

    #[test]
    fn test_metadata_emptiness() {
        let mut meta = RateLimitMetadata::default();
        assert!(meta.is_empty());
        assert!(!meta.has_windows());

        meta.requests = Some(WindowInfo::resetting_in(50, 49, Duration::from_secs(60)));
        assert!(!meta.is_empty());
        assert!(meta.has_windows());
    }
}
