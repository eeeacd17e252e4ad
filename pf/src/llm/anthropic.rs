//! Anthropic Claude API client implementation
//!
//! Implements the LlmClient trait for Anthropic's Messages API and maps the
//! provider's rate-limit headers onto [`RateLimitMetadata`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    CompletionRequest, CompletionResponse, LlmClient, LlmError, RateLimitMetadata, StopReason, TokenUsage, WindowInfo,
};
use crate::config::LlmConfig;

/// Anthropic's "overloaded" status, treated as a rate-limit rejection
const STATUS_OVERLOADED: u16 = 529;

/// Anthropic Claude API client
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "from_config: called");
        let api_key = config
            .get_api_key()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    /// Build the request body for the Anthropic API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.model
        } else {
            &request.model
        };
        debug!(%model, %request.max_tokens, "build_request_body: called");

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "messages": request.messages,
        });
        if !request.system_prompt.is_empty() {
            body["system"] = serde_json::json!(request.system_prompt);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }

    /// Parse the Anthropic API response
    fn parse_response(&self, api_response: AnthropicResponse, rate_limits: RateLimitMetadata) -> CompletionResponse {
        debug!(?api_response.stop_reason, "parse_response: called");
        let content = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .reduce(|mut acc, text| {
                acc.push_str(&text);
                acc
            });

        CompletionResponse {
            content,
            stop_reason: StopReason::from_anthropic(api_response.stop_reason.as_deref().unwrap_or("end_turn")),
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
                cache_read_tokens: api_response.usage.cache_read_input_tokens.unwrap_or(0),
                cache_creation_tokens: api_response.usage.cache_creation_input_tokens.unwrap_or(0),
            },
            rate_limits,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%request.model, %request.max_tokens, "complete: called");
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let response = match self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                // The call may already be billed; never resend it blindly
                debug!(error = %e, "complete: timeout");
                return Err(LlmError::Timeout(self.timeout));
            }
            Err(e) => {
                debug!(error = %e, "complete: network error");
                return Err(LlmError::Network(e));
            }
        };

        let status = response.status().as_u16();
        let rate_limits = parse_rate_limit_headers(response.headers());

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, text, rate_limits));
        }

        debug!("complete: success");
        let api_response: AnthropicResponse = response.json().await?;
        Ok(self.parse_response(api_response, rate_limits))
    }
}

/// Map a non-success reply onto an error, keeping whatever metadata came with it
///
/// 429 and 529 (overloaded) are rate-limit rejections for the scheduler to
/// retry. Everything else is final.
fn error_for_status(status: u16, message: String, metadata: RateLimitMetadata) -> LlmError {
    if status == 429 || status == STATUS_OVERLOADED {
        debug!(status, ?metadata.retry_after, "error_for_status: rate limited");
        return LlmError::RateLimited { metadata };
    }
    warn!(status, "error_for_status: API error");
    LlmError::ApiError {
        status,
        message,
        metadata,
    }
}

/// Extract rate-limit windows and the retry hint from Anthropic headers
///
/// Reads `anthropic-ratelimit-{requests,input-tokens,output-tokens}-{limit,remaining,reset}`
/// (reset is RFC 3339) and `retry-after` (seconds). A window is reported
/// only when all three of its headers are present and parse.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitMetadata {
    let now_wall = Utc::now();
    let now = Instant::now();

    let window = |category: &str| -> Option<WindowInfo> {
        let limit = header_u64(headers, &format!("anthropic-ratelimit-{}-limit", category))?;
        let remaining = header_u64(headers, &format!("anthropic-ratelimit-{}-remaining", category))?;
        let reset = header_str(headers, &format!("anthropic-ratelimit-{}-reset", category))?;
        let reset: DateTime<Utc> = DateTime::parse_from_rfc3339(reset).ok()?.with_timezone(&Utc);
        let reset_in = (reset - now_wall).to_std().unwrap_or(Duration::ZERO);
        Some(WindowInfo {
            limit,
            remaining: remaining.min(limit),
            reset_at: now + reset_in,
        })
    };

    let metadata = RateLimitMetadata {
        requests: window("requests"),
        input_tokens: window("input-tokens"),
        output_tokens: window("output-tokens"),
        retry_after: header_str(headers, "retry-after")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64),
    };
    debug!(?metadata, "parse_rate_limit_headers: parsed");
    metadata
}

fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key)?.to_str().ok()
}

fn header_u64(headers: &HeaderMap, key: &str) -> Option<u64> {
    header_str(headers, key)?.trim().parse().ok()
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}
