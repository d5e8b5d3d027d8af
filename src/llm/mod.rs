//! Provider-agnostic LLM call abstraction.
//!
//! Seats make one structured-JSON call per turn rather than consuming a
//! streaming delta feed, so this module centers on [`LlmClient::call`]
//! returning a complete `(SeatResponse, Usage)` pair instead of a
//! `Stream` of normalized deltas.

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI and OpenAI-compatible APIs.
    #[default]
    OpenAi,
    /// Anthropic Claude.
    Anthropic,
    /// Groq.
    Groq,
    /// xAI Grok.
    Xai,
    /// Custom/unknown provider.
    Custom,
}

impl Provider {
    /// Default base URL for this provider.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Groq => "https://api.groq.com/openai",
            Self::Xai => "https://api.x.ai",
            Self::Custom => "",
        }
    }

    /// Whether this provider uses the Anthropic Messages wire format.
    pub fn is_anthropic_shaped(self) -> bool {
        matches!(self, Self::Anthropic)
    }
}

/// Connection settings for a single provider/model pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Base URL for the provider's API.
    pub base_url: String,
    /// API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Provider type.
    pub provider: Provider,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message in a seat's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }
}

/// Request to an LLM provider adapter.
#[derive(Debug, Clone)]
pub struct SeatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A provider's completion response before envelope parsing.
#[derive(Debug, Clone)]
pub struct SeatResponse {
    pub content: String,
}

/// Token/cost usage for a single LLM call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Estimated cost in USD, when the provider reports pricing.
    pub cost_usd: Option<f64>,
}

/// Errors an [`LlmClient`] adapter can raise.
#[derive(Debug, thiserror::Error)]
pub enum LlmCallError {
    #[error("network error calling provider: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider response was not valid JSON: {0}")]
    MalformedResponse(String),
}

impl LlmCallError {
    /// Whether this error should be retried under the seat runtime's backoff policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse(_) => false,
        }
    }
}

/// A uniform adapter over an LLM provider's completion API.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Issue one completion call and return its content plus usage.
    async fn call(&self, req: SeatRequest) -> Result<(SeatResponse, Usage), LlmCallError>;

    /// The provider this client speaks to.
    fn provider(&self) -> Provider;
}
