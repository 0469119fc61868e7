//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, DeepSeek, DashScope compatible mode, Ollama, vLLM and
//! any endpoint exposing a streaming `/chat/completions`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyloom_core::error::ProviderError;
use storyloom_core::message::ChatMessage;
use storyloom_core::provider::{Provider, ProviderRequest, StreamReceiver};
use tracing::{debug, warn};

use crate::sse::{self, SseEvent};

/// An OpenAI-compatible streaming provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect()
    }

    /// Interpret one `data:` payload of a chat-completions stream.
    pub(crate) fn parse_event(data: &str) -> SseEvent {
        if data == "[DONE]" {
            return SseEvent::Done;
        }

        let event: StreamResponse = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return SseEvent::Skip,
        };

        if let Some(error) = event.error {
            return SseEvent::Error(ProviderError::StreamInterrupted(error.message));
        }

        let text: String = event
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect();
        if text.is_empty() {
            SseEvent::Skip
        } else {
            SseEvent::Text(text)
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %request.model, messages = request.messages.len(), "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(sse::spawn_reader(response, self.name.clone(), Self::parse_event))
    }
}

// --- OpenAI API types ---

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}
