//! Anthropic Messages API adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::llm::{LlmCallError, LlmClient, LlmSettings, MessageRole, Provider, SeatRequest, SeatResponse, Usage};

/// Anthropic Messages adapter.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    settings: LlmSettings,
    client: Client,
}

impl AnthropicClient {
    pub fn new(settings: LlmSettings) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");
        Self { settings, client }
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'))
    }

    /// Anthropic separates the system prompt from the turn messages.
    fn split_system(req: &SeatRequest) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system = None;
        let mut turns = Vec::new();
        for m in &req.messages {
            match m.role {
                MessageRole::System => system = Some(m.content.clone()),
                MessageRole::User => turns.push(serde_json::json!({"role": "user", "content": m.content})),
                MessageRole::Assistant => {
                    turns.push(serde_json::json!({"role": "assistant", "content": m.content}));
                }
            }
        }
        (system, turns)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn call(&self, req: SeatRequest) -> Result<(SeatResponse, Usage), LlmCallError> {
        let (system, messages) = Self::split_system(&req);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system);
        }

        let mut request = self
            .client
            .post(self.api_url())
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(ref api_key) = self.settings.api_key {
            request = request.header("x-api-key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(LlmCallError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmCallError::Http { status: status.as_u16(), body });
        }

        let parsed: AnthropicCompletion = response
            .json()
            .await
            .map_err(|e| LlmCallError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .unwrap_or_default();

        let usage = Usage {
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
            cost_usd: None,
        };

        Ok((SeatResponse { content }, usage))
    }

    fn provider(&self) -> Provider {
        self.settings.provider
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicCompletion {
    content: Vec<AnthropicBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
