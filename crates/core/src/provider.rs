//! Provider trait, the abstraction over streaming model backends.
//!
//! A Provider takes an ordered list of role-tagged messages and produces the
//! model's reply as a stream of text deltas on a channel. The chat turn
//! orchestrator drains that channel and decides what to do with each delta.
//!
//! Implementations: OpenAI-compatible endpoints, Anthropic Messages API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::ChatMessage;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The upstream model name (e.g., "gpt-4o", "claude-sonnet-4")
    pub model: String,

    /// The assembled prompt
    pub messages: Vec<ChatMessage>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            content: None,
            done: true,
        }
    }
}

/// Receiving half of a provider stream.
pub type StreamReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// `stream()` fails directly for pre-stream errors (auth, status, network);
/// errors after the first byte arrive as `Err` items on the channel.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Start generating and return the receiving end of the delta stream.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<StreamReceiver, ProviderError>;
}
