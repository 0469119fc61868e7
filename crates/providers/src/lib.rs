//! Model backends for storyloom.
//!
//! Chat providers implement `storyloom_core::Provider` and stream text
//! deltas; the embedder implements `storyloom_core::Embedder`. The router
//! picks a chat provider for a requested model id.

pub mod anthropic;
pub mod embedding;
pub mod openai_compat;
pub mod router;
mod sse;

pub use anthropic::AnthropicProvider;
pub use embedding::OpenAiEmbedder;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
