/// LLM Client: the single point of entry for all chat-completion calls in Screener.
///
/// ARCHITECTURAL RULE: No other module may call an LLM gateway directly.
/// Credential rotation and model fallback live upstream (credentials/, analysis/);
/// this module only speaks the OpenAI-compatible wire protocol for one attempt.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

/// Endpoint used when a credential's provider has no dedicated URL.
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

const RATE_LIMIT_HEADERS: [&str; 2] = ["x-ratelimit-remaining-requests", "x-ratelimit-remaining"];

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl LlmError {
    /// HTTP status behind the failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Api { status, .. } => Some(*status),
            LlmError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 429 (rate limited) and 402 (payment required) mean the key itself is unhealthy.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self.status(), Some(429) | Some(402))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Request body for one chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    error: GatewayErrorBody,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    message: String,
}

/// Text plus the transport metadata callers care about.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub text: String,
    /// Remaining requests reported by the provider's rate-limit headers.
    pub rate_limit_remaining: Option<u32>,
    pub usage: Option<Usage>,
}

/// The gateway seam. `LlmClient` is the production implementation; tests swap in
/// scripted gateways.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        provider: &str,
        request: &ChatRequest,
    ) -> Result<GatewayResponse, LlmError>;
}

/// HTTP client for OpenAI-compatible chat-completion endpoints.
/// Makes exactly one attempt per call; retries are the invoker's decision.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    default_url: String,
}

impl LlmClient {
    pub fn new(default_url: String, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            default_url,
        })
    }

    /// Maps a credential's provider label to its endpoint.
    fn endpoint_for(&self, provider: &str) -> &str {
        match provider.to_ascii_lowercase().as_str() {
            "openrouter" => DEFAULT_API_URL,
            "openai" => OPENAI_API_URL,
            "groq" => GROQ_API_URL,
            _ => self.default_url.as_str(),
        }
    }
}

#[async_trait]
impl LlmGateway for LlmClient {
    async fn complete(
        &self,
        api_key: &str,
        provider: &str,
        request: &ChatRequest,
    ) -> Result<GatewayResponse, LlmError> {
        let response = self
            .client
            .post(self.endpoint_for(provider))
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let rate_limit_remaining = rate_limit_remaining(response.headers());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM gateway returned {} for model {}", status, request.model);
            let message = serde_json::from_str::<GatewayError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&response.text().await?)?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(LlmError::EmptyContent)?;

        if let Some(usage) = &completion.usage {
            debug!(
                "LLM call succeeded: model={}, prompt_tokens={}, completion_tokens={}",
                request.model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(GatewayResponse {
            text,
            rate_limit_remaining,
            usage: completion.usage,
        })
    }
}

fn rate_limit_remaining(headers: &HeaderMap) -> Option<u32> {
    RATE_LIMIT_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok())
    })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
