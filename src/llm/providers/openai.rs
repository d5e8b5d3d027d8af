//! OpenAI and OpenAI-compatible (Groq, xAI, custom base URL) adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::llm::{LlmCallError, LlmClient, LlmSettings, MessageRole, Provider, SeatRequest, SeatResponse, Usage};

/// OpenAI-compatible chat-completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    settings: LlmSettings,
    client: Client,
}

impl OpenAiClient {
    pub fn new(settings: LlmSettings) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");
        Self { settings, client }
    }

    fn api_url(&self) -> String {
        format!("{}/v1/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn call(&self, req: SeatRequest) -> Result<(SeatResponse, Usage), LlmCallError> {
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": false,
        });

        let mut request = self.client.post(self.api_url()).json(&body);
        if let Some(ref api_key) = self.settings.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
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

        let parsed: OpenAiCompletion = response
            .json()
            .await
            .map_err(|e| LlmCallError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = parsed
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
                cost_usd: None,
            })
            .unwrap_or_default();

        Ok((SeatResponse { content }, usage))
    }

    fn provider(&self) -> Provider {
        self.settings.provider
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletion {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
