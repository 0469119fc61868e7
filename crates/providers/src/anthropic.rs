//! Anthropic Messages API provider.
//!
//! The Messages API takes the system prompt as a top-level field and expects
//! the conversation to alternate between user and assistant, so prompts are
//! reshaped before sending.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyloom_core::error::ProviderError;
use storyloom_core::message::{ChatMessage, Role};
use storyloom_core::provider::{Provider, ProviderRequest, StreamReceiver};
use tracing::{debug, warn};

use crate::sse::{self, SseEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url
            .into()
            .trim_end_matches('/')
            .trim_end_matches("/v1")
            .to_string();
        self
    }

    /// Pull system messages out into one prompt and merge consecutive
    /// same-role messages so roles alternate.
    fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<AnthropicMessage> = Vec::new();

        for message in messages {
            let role = match message.role {
                Role::System => {
                    system_parts.push(&message.content);
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            match turns.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&message.content);
                }
                _ => turns.push(AnthropicMessage {
                    role,
                    content: message.content.clone(),
                }),
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, turns)
    }

    /// Interpret one `data:` payload of a Messages stream.
    pub(crate) fn parse_event(data: &str) -> SseEvent {
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return SseEvent::Skip,
        };

        match event.kind.as_str() {
            "content_block_delta" => match event.delta {
                Some(Delta {
                    kind,
                    text: Some(text),
                }) if kind == "text_delta" && !text.is_empty() => SseEvent::Text(text),
                _ => SseEvent::Skip,
            },
            "message_stop" => SseEvent::Done,
            "error" => SseEvent::Error(ProviderError::StreamInterrupted(
                event.error.map(|e| e.message).unwrap_or_else(|| "unknown error".into()),
            )),
            _ => SseEvent::Skip,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamReceiver, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let (system, messages) = Self::split_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(sse::spawn_reader(response, self.name.clone(), Self::parse_event))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_lifted_out() {
        let messages = vec![
            ChatMessage::system("preamble"),
            ChatMessage::system("retrieved"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let (system, turns) = AnthropicProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("preamble\n\nretrieved"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let messages = vec![
            ChatMessage::user("earlier"),
            ChatMessage::user("again"),
            ChatMessage::assistant("ok"),
        ];
        let (system, turns) = AnthropicProvider::split_system(&messages);
        assert!(system.is_none());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "earlier\n\nagain");
    }

    #[test]
    fn text_delta_is_forwarded() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi t"}}"#;
        assert!(matches!(AnthropicProvider::parse_event(data), SseEvent::Text(t) if t == "Hi t"));
    }

    #[test]
    fn non_text_events_are_skipped() {
        let ping = r#"{"type":"ping"}"#;
        assert!(matches!(AnthropicProvider::parse_event(ping), SseEvent::Skip));
        let thinking = r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#;
        assert!(matches!(AnthropicProvider::parse_event(thinking), SseEvent::Skip));
    }

    #[test]
    fn stop_and_error_events() {
        assert!(matches!(
            AnthropicProvider::parse_event(r#"{"type":"message_stop"}"#),
            SseEvent::Done
        ));
        let err = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(matches!(AnthropicProvider::parse_event(err), SseEvent::Error(_)));
    }

    #[test]
    fn base_url_override_strips_version_suffix() {
        let p = AnthropicProvider::new("k")
            .unwrap()
            .with_base_url("https://proxy.local/v1/");
        assert_eq!(p.base_url, "https://proxy.local");
    }
}
