//! Retrieval and chat orchestration for storyloom.
//!
//! A chat turn flows through three stages:
//!
//! 1. **Retrieve**: embed the user's message and rank stored chunks from
//!    other threads by similarity weighted by recency
//! 2. **Assemble**: render the winners as system messages, in dialogue or
//!    narrative mode depending on the thread
//! 3. **Stream**: forward the model's output to the client while persisting
//!    it, indexing the stored turn in the background
//!
//! [`ChatService`] ties the stages together; [`build_chat_service`] wires one
//! from configuration.

pub mod bootstrap;
pub mod chat;
pub mod collector;
pub mod context;
pub mod recency;
pub mod retrieval;

#[cfg(test)]
mod test_helpers;

pub use bootstrap::build_chat_service;
pub use chat::{ChatRequest, ChatService, ChatSettings, PendingTurn, TurnOutcome, generate_title};
pub use collector::StreamReport;
pub use context::{Bucket, ChunkClassifier, KeywordClassifier, NARRATIVE_PREAMBLE, PromptAssembler, PromptMode};
pub use recency::RecencyDecay;
pub use retrieval::{IndexRequest, RetrievalService, RetrievalSettings, RetrievedChunk};
