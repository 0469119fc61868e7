//! # storyloom Core
//!
//! Domain types, traits, and error definitions for the storyloom
//! retrieval-and-streaming pipeline. This crate has **no framework
//! dependencies**: it defines the model that the storage, provider,
//! and orchestration crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`TurnRepository`], [`ThreadRepository`] and [`ChunkStore`] for persistence
//! - [`Provider`] for streamed model output
//! - [`Embedder`] for batch embeddings
//! - [`ClientSink`] for delivering raw bytes to whoever asked
//!
//! Implementations live in their respective crates, which keeps tests free
//! to swap in in-memory or scripted doubles.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod message;
pub mod provider;
pub mod repository;
pub mod sink;
pub mod thread;

// Re-export key types at crate root for ergonomics
pub use chunk::{ChunkKind, StoredChunk};
pub use embedding::Embedder;
pub use error::{
    EmbeddingError, Error, ProviderError, RepositoryError, Result, SinkError, ValidationError,
};
pub use message::{ChatMessage, Role};
pub use provider::{Provider, ProviderRequest, StreamChunk, StreamReceiver};
pub use repository::{ChunkStore, ThreadRepository, TurnRepository};
pub use sink::{ChannelSink, ClientSink, WriterSink};
pub use thread::{Thread, ThreadKind, ThreadRef, Turn};
